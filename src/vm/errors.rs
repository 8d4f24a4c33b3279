//! VM errors

use std::time::Duration;

use thiserror::Error;

/// VM result
pub type VMResult<T> = Result<T, VMError>;

/// Failures raised while executing YX code
///
/// The `Display` text is what callers see in a fault body, so it stays short
/// and free of internal detail. A `throw` surfaces exactly the thrown text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VMError {
    #[error("{0}")]
    Thrown(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("type error: {0}")]
    TypeMismatch(String),

    #[error("unknown method `{method}` on {receiver}")]
    UnknownMethod { receiver: String, method: String },

    #[error("unknown field `{field}` on {receiver}")]
    UnknownField { receiver: String, field: String },

    #[error("`{callee}` expects {expected} argument(s), got {found}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("call stack overflow (depth {0})")]
    CallStackOverflow(usize),

    #[error("execution timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("instruction budget of {0} exhausted")]
    InstructionBudget(u64),

    #[error("allocation budget of {0} bytes exceeded")]
    AllocationBudget(usize),

    #[error("output limit of {0} bytes exceeded")]
    OutputLimit(usize),

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

impl VMError {
    /// Build a type error message
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        VMError::TypeMismatch(message.into())
    }

    /// Limits enforced by the sandbox rather than raised by program logic
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            VMError::CallStackOverflow(_)
                | VMError::Timeout(_)
                | VMError::InstructionBudget(_)
                | VMError::AllocationBudget(_)
                | VMError::OutputLimit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thrown_message_is_verbatim() {
        assert_eq!(VMError::Thrown("boom".into()).to_string(), "boom");
    }

    #[test]
    fn test_timeout_message() {
        let err = VMError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "execution timed out after 1500 ms");
        assert!(err.is_limit());
    }

    #[test]
    fn test_program_errors_are_not_limits() {
        assert!(!VMError::DivisionByZero.is_limit());
        assert!(!VMError::Thrown("x".into()).is_limit());
        assert_eq!(
            VMError::IndexOutOfBounds { index: 5, len: 3 }.to_string(),
            "index 5 out of bounds for length 3"
        );
    }
}
