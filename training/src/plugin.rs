//! C-ABI model plug-in boundary.
//!
//! A model library exports two symbols:
//!
//! ```c
//! ModelBox* create(uint32_t worker);
//! void destroy(ModelBox* model);
//! ```
//!
//! `ModelBox` wraps a boxed [`Training`] object so the fat trait pointer
//! never crosses the C ABI. The [`export_model!`] macro generates both
//! symbols for a concrete model type.

use std::fmt;
use std::path::Path;

use libloading::Library;

use crate::Training;

/// FFI-safe wrapper around a boxed model.
pub struct ModelBox(pub Box<dyn Training>);

pub type CreateFn = unsafe extern "C" fn(worker: u32) -> *mut ModelBox;
pub type DestroyFn = unsafe extern "C" fn(model: *mut ModelBox);

/// The plug-in could not be loaded; fatal for the worker.
#[derive(Debug)]
pub enum ModelLoadError {
    Open {
        path: String,
        source: libloading::Error,
    },
    Symbol {
        name: &'static str,
        source: libloading::Error,
    },
    NullModel,
}

impl fmt::Display for ModelLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => write!(f, "failed to open {path}: {source}"),
            Self::Symbol { name, source } => {
                write!(f, "missing symbol {name}: {source}")
            }
            Self::NullModel => write!(f, "create returned a null model"),
        }
    }
}

impl std::error::Error for ModelLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Symbol { source, .. } => Some(source),
            Self::NullModel => None,
        }
    }
}

/// A model instance created by a dynamically loaded plug-in. The library
/// stays open for as long as the model lives.
pub struct Model {
    raw: *mut ModelBox,
    destroy: DestroyFn,
    // Kept open until the model has been destroyed.
    _lib: Library,
}

// SAFETY: the plug-in contract requires `create` to return a model whose
// Training implementation is Send; the raw pointer is owned exclusively by
// this handle.
unsafe impl Send for Model {}

impl Model {
    /// Opens `path` and instantiates a model for `worker`.
    pub fn load(path: &Path, worker: u32) -> Result<Self, ModelLoadError> {
        // SAFETY: loading a model library executes its initializers; that
        // is the point of the plug-in boundary.
        let lib = unsafe { Library::new(path) }.map_err(|source| ModelLoadError::Open {
            path: path.display().to_string(),
            source,
        })?;

        // SAFETY: symbol signatures are fixed by the plug-in contract.
        let create = unsafe { lib.get::<CreateFn>(b"create") }
            .map_err(|source| ModelLoadError::Symbol {
                name: "create",
                source,
            })?;
        let create: CreateFn = *create;

        let destroy = unsafe { lib.get::<DestroyFn>(b"destroy") }
            .map_err(|source| ModelLoadError::Symbol {
                name: "destroy",
                source,
            })?;
        let destroy: DestroyFn = *destroy;

        // SAFETY: create/destroy follow the contract above.
        let raw = unsafe { create(worker) };
        if raw.is_null() {
            return Err(ModelLoadError::NullModel);
        }

        Ok(Self {
            raw,
            destroy,
            _lib: lib,
        })
    }

    pub fn training(&mut self) -> &mut dyn Training {
        // SAFETY: raw is non-null and exclusively owned.
        unsafe { &mut *(*self.raw).0 }
    }
}

impl Training for Model {
    fn session(&mut self) -> &mut crate::Session {
        self.training().session()
    }

    fn batch_train(&mut self) -> Result<(), crate::TrainError> {
        self.training().batch_train()
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        // SAFETY: raw came from this library's create and is dropped once.
        unsafe { (self.destroy)(self.raw) }
    }
}

/// Generates the `create`/`destroy` plug-in symbols for a model type with a
/// `fn new(worker: u32) -> Self` constructor.
#[macro_export]
macro_rules! export_model {
    ($model:ty) => {
        #[no_mangle]
        pub extern "C" fn create(worker: u32) -> *mut $crate::plugin::ModelBox {
            let model = <$model>::new(worker);
            Box::into_raw(Box::new($crate::plugin::ModelBox(Box::new(model))))
        }

        #[no_mangle]
        pub extern "C" fn destroy(model: *mut $crate::plugin::ModelBox) {
            if !model.is_null() {
                // SAFETY: the pointer came from `create` above.
                drop(unsafe { Box::from_raw(model) });
            }
        }
    };
}
