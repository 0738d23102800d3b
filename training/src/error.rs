use std::fmt;

use graph::storage::CodecError;
use graph::GraphError;

/// Errors surfaced by training sessions and model implementations.
#[derive(Debug)]
pub enum TrainError {
    /// Graph construction or evaluation failed.
    Graph(GraphError),
    /// A serialized weight stream could not be read or written.
    Codec(CodecError),
    /// The live and snapshot graphs disagree on the variable count.
    VariableCountMismatch { curr: usize, prev: usize },
    /// A model-defined failure inside `batch_train`.
    Model(String),
}

impl fmt::Display for TrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(e) => write!(f, "graph error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::VariableCountMismatch { curr, prev } => {
                write!(f, "variable count mismatch: curr {curr}, prev {prev}")
            }
            Self::Model(msg) => write!(f, "model error: {msg}"),
        }
    }
}

impl std::error::Error for TrainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graph(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GraphError> for TrainError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

impl From<CodecError> for TrainError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<std::io::Error> for TrainError {
    fn from(e: std::io::Error) -> Self {
        Self::Codec(CodecError::Io(e))
    }
}
