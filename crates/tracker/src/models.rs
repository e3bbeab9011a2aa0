//! Tracker data model
//!
//! Request types are what the relay hands to a [`crate::Tracker`]; response types
//! mirror the tracker's JSON closely enough to deserialize it directly.

use serde::{Deserialize, Serialize};

/// A ticket to be created for a new support thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    /// Server the requester belongs to
    pub origin: String,
    pub reporter: String,
    pub body: String,
}

/// A change to an existing ticket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueUpdate {
    /// Logical status name, see [`crate::status`]
    pub status: Option<String>,
    pub note: Option<String>,
    pub private: bool,
    pub file: Option<FileUpload>,
}

impl IssueUpdate {
    pub fn note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn with_file(mut self, file: FileUpload) -> Self {
        self.file = Some(file);
        self
    }
}

/// A file to attach to a ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub status: IssueStatus,
    #[serde(default)]
    pub attachments: Vec<IssueAttachment>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IssueStatus {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_closed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IssueAttachment {
    pub id: u64,
    #[serde(default)]
    pub filename: String,
}

/// A note (journal entry) on a ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: u64,
    pub body: String,
    pub is_private: bool,
    pub author_id: Option<u64>,
    pub author_name: Option<String>,
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct IssueEnvelope<T> {
    pub issue: T,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateIssueBody<'a> {
    pub project_id: &'a str,
    pub subject: &'a str,
    pub description: String,
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct UpdateIssueBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub private_notes: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uploads: Vec<UploadRef>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadRef {
    pub token: String,
    pub filename: String,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueResponse {
    pub issue: IssueWithJournals,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueWithJournals {
    pub id: u64,
    pub status: IssueStatus,
    #[serde(default)]
    pub attachments: Vec<IssueAttachment>,
    #[serde(default)]
    pub journals: Vec<Journal>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Journal {
    pub id: u64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub private_notes: bool,
    #[serde(default)]
    pub user: Option<JournalUser>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JournalUser {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedIssueResponse {
    pub issue: CreatedIssue,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedIssue {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    pub upload: UploadToken,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadToken {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CurrentUserResponse {
    pub user: JournalUser,
}

impl From<IssueWithJournals> for Issue {
    fn from(issue: IssueWithJournals) -> Self {
        Issue {
            id: issue.id,
            status: issue.status,
            attachments: issue.attachments,
        }
    }
}

impl Journal {
    /// Journals without text are pure field changes, not notes
    pub(crate) fn into_note(self) -> Option<Note> {
        let body = self.notes.filter(|n| !n.trim().is_empty())?;
        Some(Note {
            id: self.id,
            body,
            is_private: self.private_notes,
            author_id: self.user.as_ref().map(|u| u.id),
            author_name: self.user.and_then(|u| u.name),
        })
    }
}
