//! Result and error types for coverage verification.

use thiserror::Error;

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Errors that can occur while verifying instrumented output
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The external instrumenter rejected the input
    #[error("Error instrumenting:\n{annotated}\n{message}")]
    Instrumentation {
        /// Error message reported by the instrumenter
        message: String,
        /// Original source with line numbers
        annotated: String,
    },

    /// No embedded coverage record where one was required
    #[error("No coverage found for [{path}]")]
    MissingRecord {
        /// Path the record was expected for
        path: String,
    },

    /// Coverage scope found but a required binding is absent or unreadable
    #[error("Incomplete coverage record: binding `{missing}` is missing or not a literal")]
    IncompleteRecord {
        /// Name of the first missing binding
        missing: String,
    },

    /// One coverage or output dimension disagrees with the expectation
    #[error("{dimension} mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Which dimension disagreed
        dimension: String,
        /// Expected value, rendered
        expected: String,
        /// Actual value, rendered
        actual: String,
    },

    /// The instrumented program threw during controlled execution
    #[error("Execution failed: {message}")]
    Execution {
        /// Error message
        message: String,
    },

    /// Source text could not be turned into a syntax tree
    #[error("Parse error: {0}")]
    Parse(#[from] crate::parse::ParseError),

    /// An exclusion glob could not be compiled
    #[error("Invalid exclusion pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Pattern as configured
        pattern: String,
        /// Compiler message
        message: String,
    },

    /// A fixture document is malformed
    #[error("Fixture error: {message}")]
    Fixture {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VerifyError {
    /// Build a labeled dimension mismatch from two debug-printable values.
    pub fn mismatch(
        dimension: impl Into<String>,
        expected: &impl std::fmt::Debug,
        actual: &impl std::fmt::Debug,
    ) -> Self {
        Self::DimensionMismatch {
            dimension: dimension.into(),
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    /// Dimension label, if this is a mismatch
    #[must_use]
    pub fn dimension(&self) -> Option<&str> {
        match self {
            Self::DimensionMismatch { dimension, .. } => Some(dimension),
            _ => None,
        }
    }
}
