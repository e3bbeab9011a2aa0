//! Error types for event decoding

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Unexpected event type: expected {expected}, got {actual}")]
    UnexpectedType {
        expected: &'static str,
        actual: String,
    },

    #[error("Malformed event content: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}
