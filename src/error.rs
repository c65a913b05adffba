//! Error types for the interpreter.

use std::fmt;

/// An error raised while binding or evaluating a phrase.
#[derive(Debug, Clone)]
pub struct EvalError {
    pub message: String,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// User input violated a runtime contract; the phrase fails but the
    /// program stays loaded.
    Runtime,
    /// An internal invariant tripped; indicates a bug.
    System,
    /// The phrase could not be bound (no matching operation overload,
    /// malformed syntax); the statement becomes an error expression.
    Bind,
}

impl EvalError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Runtime,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::System,
        }
    }

    pub fn bind(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Bind,
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            ErrorKind::Runtime => "Runtime Error",
            ErrorKind::System => "Internal Error",
            ErrorKind::Bind => "Bind Error",
        };
        write!(f, "{prefix}: {}", self.message)
    }
}

impl std::error::Error for EvalError {}

pub const SUBSEQ_BOUNDS_ERR: &str = "Cannot write outside bounds of subsequence.";
pub const SUBSEQ_RESIZE_ERR: &str = "Cannot resize subsequence.";
pub const SUBSEQ_CONCAT_ERR: &str = "Cannot concatenate to subsequence.";
pub const INDEX_BOUNDS_ERR: &str = "Index is outside sequence bounds.";
pub const EMPTY_VALUE_ERR: &str = "Cannot get value from empty sequence.";
pub const DIV_ZERO_ERR: &str = "Division by zero.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes() {
        assert_eq!(
            EvalError::runtime("x").to_string(),
            "Runtime Error: x"
        );
        assert_eq!(EvalError::system("y").to_string(), "Internal Error: y");
        assert_eq!(EvalError::bind("z").to_string(), "Bind Error: z");
    }
}
