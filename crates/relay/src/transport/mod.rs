//! Messaging transport collaborator
//!
//! The relay never talks to the messaging network directly; everything goes
//! through [`Transport`], so the core can be driven by [`MatrixTransport`] in
//! production and by in-memory fakes in tests.

mod matrix;

use std::collections::HashMap;

use async_trait::async_trait;
use deskrelay_shared::{EventId, MessageContent, Page, Profile, RoomEvent, RoomId, UserId};

pub use matrix::MatrixTransport;

/// Error type for transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Homeserver returned {status} {errcode}: {message}")]
    Api {
        status: u16,
        errcode: String,
        message: String,
    },

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
}

impl TransportError {
    /// Returns true if this error is transient and a later attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(_) => true,
            TransportError::Api { status, .. } => *status == 429 || *status >= 500,
            TransportError::Json(_) => false,
            TransportError::Url(_) => false,
            TransportError::Unsupported(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::Api { status: 404, .. })
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// The operations the relay consumes from the messaging layer
#[async_trait]
pub trait Transport: Send + Sync {
    /// The relay's own user id
    fn user_id(&self) -> &UserId;

    async fn join(&self, room: &RoomId) -> TransportResult<()>;

    async fn leave(&self, room: &RoomId) -> TransportResult<()>;

    /// Send a message (edits are messages with a replace relation)
    async fn send_message(&self, room: &RoomId, content: &MessageContent)
        -> TransportResult<EventId>;

    async fn send_reaction(
        &self,
        room: &RoomId,
        target: &EventId,
        key: &str,
    ) -> TransportResult<EventId>;

    async fn get_event(&self, room: &RoomId, event: &EventId) -> TransportResult<RoomEvent>;

    /// Decrypt an end-to-end encrypted event; plain events pass through unchanged
    async fn decrypt(&self, event: RoomEvent) -> TransportResult<RoomEvent>;

    /// Thread roots of a room, newest first
    async fn list_threads(&self, room: &RoomId, from: Option<&str>)
        -> TransportResult<Page<RoomEvent>>;

    /// Events inside a thread (excluding the root), newest first
    async fn thread_events(
        &self,
        room: &RoomId,
        root: &EventId,
        from: Option<&str>,
    ) -> TransportResult<Page<RoomEvent>>;

    /// Room timeline, newest first
    async fn recent_messages(
        &self,
        room: &RoomId,
        from: Option<&str>,
    ) -> TransportResult<Page<RoomEvent>>;

    async fn joined_members(&self, room: &RoomId) -> TransportResult<Vec<UserId>>;

    async fn display_name(&self, user: &UserId) -> TransportResult<Option<String>>;

    async fn profile(&self, user: &UserId) -> TransportResult<Profile>;

    /// Fetch media content by its transport url
    async fn download(&self, url: &str) -> TransportResult<Vec<u8>>;

    /// Read a small string-map record; `None` if it was never written
    async fn account_data(&self, name: &str) -> TransportResult<Option<HashMap<String, String>>>;

    async fn set_account_data(
        &self,
        name: &str,
        data: &HashMap<String, String>,
    ) -> TransportResult<()>;
}
