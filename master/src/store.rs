//! The authoritative weight buffer and its version token.

use std::fmt;

use graph::storage::{self, CodecError};
use parking_lot::Mutex;
use rayon::prelude::*;

/// Rejection reasons for write operations on the store.
#[derive(Debug)]
pub enum StoreError {
    /// The caller's version token is not the current one.
    VersionMismatch { current: String },
    /// The streamed buffer could not be decoded.
    Codec(CodecError),
    /// The delta holds a different variable set than the weights.
    Incompatible { weights: usize, delta: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionMismatch { current } => {
                write!(f, "version mismatch, current is {current}")
            }
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Incompatible { weights, delta } => {
                write!(f, "incompatible delta: {weights} weights vs {delta} deltas")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

struct Inner {
    weights: Vec<u8>,
    prefix: String,
    counter: u64,
    version: String,
}

impl Inner {
    fn bump(&mut self) {
        self.counter += 1;
        self.version = format!("{}-{}", self.prefix, self.counter);
    }
}

/// Serialized weights plus an opaque version token, shared by every
/// connection handler. The lock is held only to copy a chunk out or to
/// apply a completed write.
pub struct WeightStore {
    inner: Mutex<Inner>,
}

impl WeightStore {
    /// A store seeded with `weights` (possibly empty) and a fresh random
    /// version prefix.
    pub fn new(weights: Vec<u8>) -> Self {
        let prefix = format!("{:08x}", rand::random::<u32>());
        let version = format!("{prefix}-0");
        Self {
            inner: Mutex::new(Inner {
                weights,
                prefix,
                counter: 0,
                version,
            }),
        }
    }

    pub fn version(&self) -> String {
        self.inner.lock().version.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the whole buffer, for persistence.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().weights.clone()
    }

    /// A chunk of up to `max` bytes starting at `position`, with the
    /// current version and whether this chunk reaches the end.
    pub fn chunk(&self, position: u64, max: usize) -> (String, Vec<u8>, bool) {
        let inner = self.inner.lock();
        let start = (position as usize).min(inner.weights.len());
        let end = (start + max).min(inner.weights.len());
        let complete = end == inner.weights.len();
        (inner.version.clone(), inner.weights[start..end].to_vec(), complete)
    }

    /// Replaces the buffer. Accepted when `expect` is `None` (first-write
    /// wins) or matches the current version; bumps the version.
    pub fn replace(&self, expect: Option<&str>, weights: Vec<u8>) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        check_version(&inner.version, expect)?;
        inner.weights = weights;
        inner.bump();
        Ok(inner.version.clone())
    }

    /// Applies a completed delta stream: decodes both sides, adds
    /// variable-wise and re-serializes, then bumps the version. Holding
    /// the lock serializes concurrent appliers.
    pub fn apply_update(&self, expect: Option<&str>, delta: &[u8]) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        check_version(&inner.version, expect)?;

        let mut weights = storage::read_weights(&mut &inner.weights[..])?;
        let deltas = storage::read_weights(&mut &delta[..])?;
        if weights.len() != deltas.len() {
            return Err(StoreError::Incompatible {
                weights: weights.len(),
                delta: deltas.len(),
            });
        }
        if weights
            .iter()
            .zip(&deltas)
            .any(|(w, d)| w.dim() != d.dim())
        {
            return Err(StoreError::Incompatible {
                weights: weights.len(),
                delta: deltas.len(),
            });
        }

        weights
            .par_iter_mut()
            .zip(deltas.par_iter())
            .for_each(|(w, d)| *w += d);

        let mut buffer = Vec::with_capacity(inner.weights.len());
        let refs: Vec<_> = weights.iter().collect();
        storage::write_weights(&refs, &mut buffer)
            .map_err(|e| StoreError::Codec(CodecError::Io(e)))?;

        inner.weights = buffer;
        inner.bump();
        Ok(inner.version.clone())
    }
}

fn check_version(current: &str, expect: Option<&str>) -> Result<(), StoreError> {
    match expect {
        None => Ok(()),
        Some(v) if v == current => Ok(()),
        Some(_) => Err(StoreError::VersionMismatch {
            current: current.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use graph::storage;
    use graph::tensor;

    use super::*;

    fn serialized(values: &[f32]) -> Vec<u8> {
        let tensors: Vec<_> = values.iter().map(|&v| tensor::full(1, 2, v)).collect();
        let refs: Vec<_> = tensors.iter().collect();
        let mut buf = Vec::new();
        storage::write_weights(&refs, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_chunking_walks_the_buffer() {
        let store = WeightStore::new((0u8..100).collect());

        let (v1, chunk, complete) = store.chunk(0, 40);
        assert_eq!(chunk.len(), 40);
        assert!(!complete);

        let (v2, chunk, complete) = store.chunk(40, 40);
        assert_eq!(chunk, (40u8..80).collect::<Vec<_>>());
        assert!(!complete);
        assert_eq!(v1, v2);

        let (_, chunk, complete) = store.chunk(80, 40);
        assert_eq!(chunk.len(), 20);
        assert!(complete);

        let (_, chunk, complete) = store.chunk(200, 40);
        assert!(chunk.is_empty());
        assert!(complete);
    }

    #[test]
    fn test_replace_requires_current_version() {
        let store = WeightStore::new(Vec::new());
        let v0 = store.version();

        let v1 = store.replace(None, vec![1, 2, 3]).unwrap();
        assert_ne!(v0, v1);

        assert!(matches!(
            store.replace(Some(&v0), vec![9]),
            Err(StoreError::VersionMismatch { .. })
        ));
        let v2 = store.replace(Some(&v1), vec![4, 5]).unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.snapshot(), vec![4, 5]);
    }

    #[test]
    fn test_apply_update_adds_variable_wise() {
        let store = WeightStore::new(serialized(&[1.0, 10.0]));
        let version = store.version();

        let next = store
            .apply_update(Some(&version), &serialized(&[0.5, -2.0]))
            .unwrap();
        assert_ne!(version, next);

        let weights = storage::read_weights(&mut &store.snapshot()[..]).unwrap();
        assert_eq!(weights[0], tensor::full(1, 2, 1.5));
        assert_eq!(weights[1], tensor::full(1, 2, 8.0));
    }

    #[test]
    fn test_apply_update_rejects_stale_version() {
        let store = WeightStore::new(serialized(&[1.0]));
        let stale = store.version();
        store.replace(None, serialized(&[2.0])).unwrap();

        assert!(matches!(
            store.apply_update(Some(&stale), &serialized(&[1.0])),
            Err(StoreError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_apply_update_rejects_incompatible_delta() {
        let store = WeightStore::new(serialized(&[1.0, 2.0]));
        assert!(matches!(
            store.apply_update(None, &serialized(&[1.0])),
            Err(StoreError::Incompatible { .. })
        ));
    }
}
