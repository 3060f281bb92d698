// Error types for the observation hierarchy

use thiserror::Error;

/// Result type alias for trace operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Errors raised by trace and observation lifecycle calls
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// An observation was requested on a context with no running trace
    #[error("No active trace")]
    NoActiveTrace,

    /// A scoped guard was released while another entry sat on top of the stack
    #[error("Stack discipline violation: released {expected} but stack top was {found}")]
    StackDisciplineViolation { expected: String, found: String },

    /// `start` was called on a context that already runs a trace
    #[error("A trace is already active on this context")]
    AlreadyActive,
}

impl TraceError {
    /// Create a stack discipline violation
    pub fn stack_violation(expected: impl Into<String>, found: impl Into<String>) -> Self {
        TraceError::StackDisciplineViolation {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Errors returned by observation sinks
///
/// The core never propagates these into caller code; they are logged at the
/// export boundary.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Export error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Serialization(e.to_string())
    }
}
