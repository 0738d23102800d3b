//! Distributed-training session state and the model plug-in boundary.
//!
//! A [`Session`] owns the live graph and a snapshot of the last weights
//! seen from the master, and converts between the two and the serialized
//! weight streams. Concrete models implement [`Training`] and are loaded
//! into workers through the C-ABI plug-in interface in [`plugin`].

mod error;
pub mod plugin;
mod session;

pub use error::TrainError;
pub use session::Session;

/// A trainable model driven by a worker thread.
///
/// Implementations own their model graph through the embedded [`Session`]
/// and perform one local optimizer step per `batch_train` call (forward,
/// backward, update, gradient reset).
pub trait Training: Send {
    fn session(&mut self) -> &mut Session;

    fn batch_train(&mut self) -> Result<(), TrainError>;
}
