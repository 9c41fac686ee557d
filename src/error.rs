//! Error types for colflow operations.

use thiserror::Error;

/// Result type alias using [`ColflowError`].
pub type Result<T> = std::result::Result<T, ColflowError>;

/// Error types for colflow operations.
#[derive(Debug, Error)]
pub enum ColflowError {
    /// A referenced column or key is absent, or names collide.
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Operand or column kinds are incompatible for the requested operation.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Column lengths disagree when assembling a table.
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// The requested operator or aggregate is not implemented.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Integer division or modulo by zero.
    #[error("Division by zero")]
    DivisionByZero,

    /// Integer arithmetic overflowed.
    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    /// The worker pool could not be started.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// A plan node failed during materialization.
    #[error("{node} failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<ColflowError>,
    },
}

impl ColflowError {
    /// Builds a [`ColflowError::TypeMismatch`].
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ColflowError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Attributes this error to the named plan node.
    #[must_use]
    pub fn at_node(self, node: impl Into<String>) -> Self {
        ColflowError::NodeFailed {
            node: node.into(),
            source: Box::new(self),
        }
    }

    /// Returns the underlying error, skipping node attribution.
    #[must_use]
    pub fn root_cause(&self) -> &ColflowError {
        match self {
            ColflowError::NodeFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns the name of the node that failed, if attributed.
    #[must_use]
    pub fn failed_node(&self) -> Option<&str> {
        match self {
            ColflowError::NodeFailed { node, .. } => Some(node.as_str()),
            _ => None,
        }
    }
}
