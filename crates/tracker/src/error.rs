//! Tracker error types

use thiserror::Error;

/// Tracker-specific errors
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tracker API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unknown tracker status: {0}")]
    UnknownStatus(String),

    #[error("Invalid response from tracker: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TrackerError {
    /// Returns true if this error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::Http(e) => !e.is_decode(),
            TrackerError::Api { status, .. } => *status == 429 || *status >= 500,

            TrackerError::Json(_) => false,
            TrackerError::UnknownStatus(_) => false,
            TrackerError::InvalidResponse(_) => false,
            TrackerError::Config(_) => false,
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
