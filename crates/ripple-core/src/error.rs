//! Error types for Ripple

use thiserror::Error;

/// Validation failure reported by a model validator
#[derive(Error, Clone, Debug, PartialEq)]
#[error("{message}")]
pub struct ValidationError {
    /// Attribute the failure relates to, if any
    pub attribute: Option<String>,
    /// Human readable reason
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError {
            attribute: None,
            message: message.into(),
        }
    }

    pub fn on(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            attribute: Some(attribute.into()),
            message: message.into(),
        }
    }
}

/// Core Ripple errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RippleError {
    // Misuse
    #[error("Cannot sort a collection without a comparator")]
    MissingComparator,

    #[error("A url or url root must be specified")]
    MissingUrl,

    #[error("No transport configured for {0}")]
    MissingTransport(String),

    // Validation
    #[error("Validation failed: {0}")]
    Invalid(#[from] ValidationError),
}

/// Result type for Ripple operations
pub type RippleResult<T> = Result<T, RippleError>;
