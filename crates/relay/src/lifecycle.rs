//! Opening and closing support threads

use deskrelay_shared::{meta, EventId, MessageContent, RoomId, UserId};
use deskrelay_tracker::{status, IssueUpdate, NewIssue};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{RelayError, RelayResult};
use crate::format::{self, DONE_PREFIX, OPEN_PREFIX};
use crate::lock::keys;
use crate::relay::Relay;
use crate::store::ReferenceFilter;

/// Result of [`Relay::start_thread`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStart {
    pub thread_id: EventId,
    /// False when an existing thread was returned
    pub created: bool,
}

/// What triggered a thread closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Command { operator: UserId },
    Tracker,
    AgeSweep,
    CustomerLeft,
}

impl CloseReason {
    fn annotation(&self, retention_days: u64) -> String {
        match self {
            CloseReason::Command { operator } => format!("Done. Closed by {operator}."),
            CloseReason::Tracker => "Done. The ticket was closed in the tracker.".to_string(),
            CloseReason::AgeSweep => {
                format!("Done. Closed after {retention_days} days without activity.")
            }
            CloseReason::CustomerLeft => "Done. The customer left the conversation.".to_string(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Command { .. } => "command",
            CloseReason::Tracker => "tracker",
            CloseReason::AgeSweep => "age_sweep",
            CloseReason::CustomerLeft => "customer_left",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// Age sweep candidate with recent activity
    Skipped,
}

impl Relay {
    /// Find or create the thread of a conversation
    pub async fn start_thread(&self, room: &RoomId, user: &UserId) -> RelayResult<ThreadStart> {
        let _guard = self.locks.lock(keys::room(room)).await;
        self.ensure_thread(room, user).await
    }

    /// [`Relay::start_thread`] for callers already holding the conversation lock
    pub(crate) async fn ensure_thread(&self, room: &RoomId, user: &UserId) -> RelayResult<ThreadStart> {
        if let Some(thread_id) = self.store.thread_for_conversation(room).await? {
            return Ok(ThreadStart {
                thread_id,
                created: false,
            });
        }

        let origin = user.server_name()?.to_string();
        let nth = match self
            .store
            .count_references(ReferenceFilter::Requester(user))
            .await
        {
            Ok(previous) => previous + 1,
            Err(e) => {
                tracing::warn!(user_id = %user, error = %e, "Could not count previous requests");
                1
            }
        };
        let name = self.identities.resolve_name(user).await;

        let mut announcement = MessageContent::notice(format!(
            "{OPEN_PREFIX}{} ({user}) from {origin}: {} request",
            name.plain,
            format::ordinal(nth)
        ))
        .with_html(format!(
            "{OPEN_PREFIX}{} from {}: {} request",
            name.rich,
            format::escape_html(&origin),
            format::ordinal(nth)
        ));
        announcement
            .extra
            .insert(meta::REQUESTER.to_string(), Value::String(user.to_string()));
        announcement
            .extra
            .insert(meta::ORIGIN.to_string(), Value::String(origin.clone()));

        let thread_id = self
            .transport
            .send_message(&self.config.operator_room, &announcement)
            .await?;

        let ticket = self.create_ticket(room, &thread_id, user, &origin, &name.plain).await;

        self.store.link_thread(room, &thread_id).await?;
        if let Some(ticket) = ticket {
            self.store.link_ticket(room, &thread_id, ticket).await?;
        }

        tracing::info!(
            room_id = %room,
            thread_id = %thread_id,
            ticket_id = ?ticket,
            "Opened support thread"
        );

        if !self.config.silent {
            let greeting = if origin == self.transport.user_id().server_name()? {
                &self.config.greeting_local
            } else {
                &self.config.greeting_foreign
            };
            self.send_notice(room, MessageContent::text(greeting.as_str()))
                .await;
        }

        Ok(ThreadStart {
            thread_id,
            created: true,
        })
    }

    /// Best effort; a thread without a ticket is valid
    async fn create_ticket(
        &self,
        room: &RoomId,
        thread: &EventId,
        user: &UserId,
        origin: &str,
        name: &str,
    ) -> Option<u64> {
        let tracker = self.tracker.as_ref()?;
        let _guard = self.locks.lock(keys::ticket_creation(user)).await;

        let issue = NewIssue {
            title: format!("Support request from {name}"),
            origin: origin.to_string(),
            reporter: user.to_string(),
            body: format!("Conversation: {room}\nThread: {thread}"),
        };
        match tracker.create_issue(issue).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(room_id = %room, error = %e, "Ticket creation failed, continuing without");
                None
            }
        }
    }

    /// Close a thread and forget every mapping that points at it
    ///
    /// Locks the conversation before the thread, the same order forwarding uses.
    pub async fn close_thread(
        &self,
        thread: &EventId,
        reason: CloseReason,
    ) -> RelayResult<CloseOutcome> {
        let ops = &self.config.operator_room;
        let unlinked =
            || RelayError::NotFound(format!("thread {thread} is not linked to a conversation"));

        let room = self
            .store
            .conversation_for_thread(thread)
            .await?
            .ok_or_else(unlinked)?;
        let _room_guard = self.locks.lock(keys::room(&room)).await;
        let _thread_guard = self.locks.lock(keys::thread(thread)).await;

        // A concurrent close may have finished while we waited
        if self.store.conversation_for_thread(thread).await?.as_ref() != Some(&room) {
            return Err(unlinked());
        }

        let latest = self.transport.thread_events(ops, thread, None).await?;
        let last_event = latest.chunk.first();

        if reason == CloseReason::AgeSweep {
            let last_activity = match last_event {
                Some(event) => event.origin_server_ts,
                None => self.transport.get_event(ops, thread).await?.origin_server_ts,
            };
            let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
            let retention = self.config.retention.as_millis() as i64;
            if now - last_activity < retention {
                tracing::debug!(thread_id = %thread, "Thread still active, not sweeping");
                return Ok(CloseOutcome::Skipped);
            }
        }

        let retention_days = self.config.retention.as_secs() / (24 * 60 * 60);
        let annotation = reason.annotation(retention_days);
        let notice = MessageContent::notice(annotation.as_str())
            .in_thread(thread, last_event.map(|e| &e.event_id));
        self.send_notice(ops, notice).await;

        self.mark_announcement(thread, DONE_PREFIX).await;

        if let Some(ticket) = self.store.ticket_for_thread(thread).await? {
            self.close_ticket(ticket, &reason, &annotation).await;
        }

        if !self.config.silent {
            self.send_notice(&room, MessageContent::text(self.config.farewell.as_str()))
                .await;
        }
        if self.config.leave_on_close {
            if let Err(e) = self.transport.leave(&room).await {
                tracing::warn!(room_id = %room, error = %e, "Failed to leave conversation");
            }
        }

        self.store.unlink(Some(&room), thread).await?;
        tracing::info!(
            thread_id = %thread,
            room_id = %room,
            reason = reason.as_str(),
            "Closed support thread"
        );
        Ok(CloseOutcome::Closed)
    }

    /// Edit the announcement so its status prefix reads `prefix`
    async fn mark_announcement(&self, thread: &EventId, prefix: &str) {
        let ops = &self.config.operator_room;
        let root = match self.transport.get_event(ops, thread).await {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(thread_id = %thread, error = %e, "Announcement not found");
                return;
            }
        };
        let mut content = match root.message_content() {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(thread_id = %thread, error = %e, "Announcement is not a message");
                return;
            }
        };

        content.body = format::with_status(prefix, &content.body);
        content.formatted_body = content
            .formatted_body
            .map(|html| format::with_status(prefix, &html));
        content.relates_to = None;
        content.new_content = None;

        let edit = content.into_edit_of(thread);
        if let Err(e) = self.transport.send_message(ops, &edit).await {
            tracing::warn!(thread_id = %thread, error = %e, "Failed to update announcement");
        }
    }

    async fn close_ticket(&self, ticket: u64, reason: &CloseReason, annotation: &str) {
        let Some(tracker) = &self.tracker else {
            return;
        };

        if *reason != CloseReason::Tracker {
            let update = IssueUpdate::note(annotation).with_status(status::CLOSED);
            if let Err(e) = tracker.update_issue(ticket, update).await {
                tracing::warn!(ticket_id = ticket, error = %e, "Failed to close ticket");
            }
        }

        match tracker.get_issue(ticket, true).await {
            Ok(issue) => {
                for attachment in issue.attachments {
                    if let Err(e) = tracker.delete_attachment(attachment.id).await {
                        tracing::warn!(
                            ticket_id = ticket,
                            attachment_id = attachment.id,
                            error = %e,
                            "Failed to delete attachment"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::warn!(ticket_id = ticket, error = %e, "Failed to fetch ticket attachments");
            }
        }
    }
}
