//! Relay error types

use deskrelay_shared::EventError;
use deskrelay_tracker::TrackerError;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Error type for relay operations
///
/// Missing mappings are not errors: lookups return `Option` and callers branch on it.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Invalid event: {0}")]
    Event(#[from] EventError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
