//! DeskRelay Ticket Tracker Integration
//!
//! Mirrors support threads into an external issue tracker. The relay core only
//! talks to the [`Tracker`] trait; [`RedmineClient`] is the REST implementation.

pub mod client;
pub mod error;
pub mod models;

use async_trait::async_trait;

pub use client::{RedmineClient, TrackerConfig};
pub use error::{TrackerError, TrackerResult};
pub use models::{FileUpload, Issue, IssueAttachment, IssueStatus, IssueUpdate, NewIssue, Note};

/// Logical status names understood by every tracker implementation
pub mod status {
    pub const NEW: &str = "new";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const CLOSED: &str = "closed";
}

/// The operations the relay consumes from a ticket tracker
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Create an issue and return its id
    async fn create_issue(&self, issue: NewIssue) -> TrackerResult<u64>;

    /// Change status and/or append a note and file to an issue
    async fn update_issue(&self, id: u64, update: IssueUpdate) -> TrackerResult<()>;

    async fn get_issue(&self, id: u64, include_attachments: bool) -> TrackerResult<Issue>;

    /// All notes of an issue in tracker order
    async fn get_notes(&self, id: u64) -> TrackerResult<Vec<Note>>;

    async fn delete_attachment(&self, id: u64) -> TrackerResult<()>;

    /// Id of the account the relay authenticates as
    async fn current_user_id(&self) -> TrackerResult<u64>;

    /// Map a logical status name to the tracker-specific status code
    fn status_id(&self, name: &str) -> Option<u32>;

    /// Whether the issue is in a terminal state
    fn is_terminal(&self, issue: &Issue) -> bool;
}
