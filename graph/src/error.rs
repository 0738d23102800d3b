use std::fmt;

/// Errors produced while building or evaluating a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two operands have incompatible shapes for the given operator.
    ShapeMismatch {
        op: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    },

    /// A constant or variable was forwarded before its value was sized.
    UnsetConstant { node: usize },

    /// A node name was registered twice within the same graph.
    DuplicateName(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch { op, lhs, rhs } => write!(
                f,
                "shape mismatch in {op}: {}x{} vs {}x{}",
                lhs.0, lhs.1, rhs.0, rhs.1
            ),
            Self::UnsetConstant { node } => {
                write!(f, "node {node} was forwarded without a value")
            }
            Self::DuplicateName(name) => write!(f, "duplicate node name: {name}"),
        }
    }
}

impl std::error::Error for GraphError {}
