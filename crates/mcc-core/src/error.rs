//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur when constructing domain values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Identity string was empty or malformed
    #[error("Invalid maritime id {value:?}: {reason}")]
    InvalidIdentity { value: String, reason: String },

    /// Coordinate outside its legal range
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidCoordinate {
        field: String,
        value: f64,
        expected: String,
    },

    /// Timestamp could not be represented
    #[error("Invalid timestamp: {millis} ms since epoch")]
    InvalidTimestamp { millis: i64 },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
