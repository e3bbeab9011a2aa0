//! Forwarding between conversations and threads
//!
//! Every forwarded copy carries the id of the event it mirrors under
//! [`meta::SOURCE_EVENT`], which is how reactions and edits find their
//! counterpart on the other side.

use std::sync::Arc;

use deskrelay_shared::{meta, EventId, MessageContent, RoomEvent, RoomId, HTML_FORMAT};
use deskrelay_tracker::{FileUpload, IssueUpdate, Tracker};
use serde_json::Value;

use crate::error::{RelayError, RelayResult};
use crate::format;
use crate::identity::ResolvedName;
use crate::lock::keys;
use crate::relay::{Relay, APOLOGY};
use crate::transport::Transport;

/// How many pages to scan when looking for a counterpart by content
const MAX_SEARCH_PAGES: usize = 5;

/// Copy of a customer message as it appears in the thread
pub fn customer_copy(content: &MessageContent, name: &ResolvedName) -> MessageContent {
    let mut copy = content.clone();
    copy.relates_to = None;
    copy.new_content = None;
    copy.extra.remove(meta::SOURCE_EVENT);

    if copy.is_text_like() {
        let html = copy
            .formatted_body
            .take()
            .unwrap_or_else(|| format::escape_html(&copy.body));
        copy.body = format!("{}: {}", name.plain, copy.body);
        copy.format = Some(HTML_FORMAT.to_string());
        copy.formatted_body = Some(format!("{}: {}", name.rich, html));
    }
    copy
}

/// Copy of an operator reply as it is sent to the customer
pub fn operator_copy(content: &MessageContent, source: &EventId) -> MessageContent {
    let mut copy = content.clone();
    copy.relates_to = None;
    copy.new_content = None;
    copy.body = format::strip_quotes(&copy.body);
    copy.formatted_body = copy
        .formatted_body
        .take()
        .map(|html| format::strip_html_quotes(&html));
    if copy.formatted_body.is_none() {
        copy.format = None;
    }
    copy.with_source_event(source)
}

impl Relay {
    // =========================================================================
    // Conversation -> Thread
    // =========================================================================

    pub(crate) async fn handle_customer_message(&self, event: &RoomEvent) -> RelayResult<()> {
        let content = event.message_content()?;
        if content.is_notice() {
            return Ok(());
        }

        // Held until the copy is in the thread so one conversation forwards in order
        let _guard = self.locks.lock(keys::room(&event.room_id)).await;
        if let Some(target) = content.replaces() {
            self.forward_customer_edit(event, &content, target).await;
            return Ok(());
        }

        let start = match self.ensure_thread(&event.room_id, &event.sender).await {
            Ok(start) => start,
            Err(e) => {
                tracing::error!(room_id = %event.room_id, error = %e, "Could not open thread");
                self.send_notice(&event.room_id, MessageContent::notice(APOLOGY))
                    .await;
                return Err(e);
            }
        };

        let name = self.identities.resolve_name(&event.sender).await;
        let forwarded = customer_copy(&content, &name)
            .in_thread(&start.thread_id, None)
            .with_source_event(&event.event_id);

        if let Err(e) = self
            .transport
            .send_message(&self.config.operator_room, &forwarded)
            .await
        {
            tracing::error!(
                room_id = %event.room_id,
                thread_id = %start.thread_id,
                error = %e,
                "Failed to forward customer message"
            );
            self.send_notice(&event.room_id, MessageContent::notice(APOLOGY))
                .await;
            return Err(e.into());
        }

        let ticket = self.store.ticket_for_thread(&start.thread_id).await?;
        self.mirror_to_ticket(ticket, format!("{}: {}", name.plain, content.body), &content);
        Ok(())
    }

    async fn forward_customer_edit(&self, event: &RoomEvent, content: &MessageContent, target: &EventId) {
        let room = &event.room_id;
        let ops = &self.config.operator_room;

        let thread = match self.store.thread_for_conversation(room).await {
            Ok(Some(thread)) => thread,
            Ok(None) => {
                tracing::debug!(room_id = %room, "Edit in a conversation without thread");
                return;
            }
            Err(e) => {
                tracing::warn!(room_id = %room, error = %e, "Mapping lookup failed for edit");
                return;
            }
        };

        let copy = match self.find_by_source(ops, Some(&thread), target).await {
            Ok(Some(copy)) => copy,
            Ok(None) => {
                tracing::warn!(room_id = %room, event_id = %target, "Edited message not found in thread");
                return;
            }
            Err(e) => {
                tracing::warn!(room_id = %room, error = %e, "Search for edited message failed");
                return;
            }
        };

        let replacement = content
            .new_content
            .as_deref()
            .cloned()
            .unwrap_or_else(|| content.clone());
        let name = self.identities.resolve_name(&event.sender).await;
        let edit = customer_copy(&replacement, &name)
            .with_source_event(target)
            .into_edit_of(&copy);

        if let Err(e) = self.transport.send_message(ops, &edit).await {
            tracing::warn!(thread_id = %thread, error = %e, "Failed to forward edit");
        }
    }

    // =========================================================================
    // Thread -> Conversation
    // =========================================================================

    pub(crate) async fn handle_operator_message(&self, event: &RoomEvent) -> RelayResult<()> {
        let content = event.message_content()?;
        if content.is_notice() {
            return Ok(());
        }
        if self.try_command(event, &content).await? {
            return Ok(());
        }
        if content.replaces().is_some() {
            tracing::debug!(event_id = %event.event_id, "Operator edits are not forwarded");
            return Ok(());
        }

        let ops = &self.config.operator_room;
        let Some(thread) = content.thread_root().cloned() else {
            if !self.config.ignore_unthreaded {
                let notice = MessageContent::notice(
                    "Replies reach a customer only when sent inside their support thread.",
                )
                .in_thread(&event.event_id, None);
                self.send_notice(ops, notice).await;
            }
            return Ok(());
        };

        let Some(room) = self.store.conversation_for_thread(&thread).await? else {
            tracing::debug!(thread_id = %thread, "Reply in a thread without conversation");
            if !self.config.ignore_unthreaded {
                let notice =
                    MessageContent::notice("This thread is not linked to an open conversation.")
                        .in_thread(&thread, Some(&event.event_id));
                self.send_notice(ops, notice).await;
            }
            return Ok(());
        };

        let outgoing = operator_copy(&content, &event.event_id);
        if let Err(e) = self.transport.send_message(&room, &outgoing).await {
            let e = RelayError::from(e);
            tracing::error!(thread_id = %thread, room_id = %room, error = %e, "Failed to forward reply");
            self.report_to_operators(Some(&thread), "Reply was not delivered", &e)
                .await;
            return Err(e);
        }

        let ticket = self.store.ticket_for_thread(&thread).await?;
        let name = self.identities.resolve_name(&event.sender).await;
        self.mirror_to_ticket(ticket, format!("{}: {}", name.plain, outgoing.body), &content);
        Ok(())
    }

    // =========================================================================
    // Reactions
    // =========================================================================

    /// Replay a reaction onto the counterpart event; failures are only logged
    pub(crate) async fn handle_reaction(&self, event: &RoomEvent) {
        if let Err(e) = self.relay_reaction(event).await {
            tracing::warn!(event_id = %event.event_id, error = %e, "Reaction not relayed");
        }
    }

    async fn relay_reaction(&self, event: &RoomEvent) -> RelayResult<()> {
        let reaction = event.reaction()?;
        let (Some(target), Some(key)) = (reaction.target(), reaction.key()) else {
            return Ok(());
        };
        let ops = &self.config.operator_room;

        let mut source = self.transport.get_event(&event.room_id, target).await?;
        if source.is_encrypted() {
            source = self.transport.decrypt(source).await?;
        }

        let (room, thread) = if event.room_id == *ops {
            let Some(thread) = source.thread_root() else {
                tracing::debug!(event_id = %target, "Reaction outside a thread");
                return Ok(());
            };
            let Some(room) = self.store.conversation_for_thread(&thread).await? else {
                return Ok(());
            };
            (room, None)
        } else {
            let Some(thread) = self.store.thread_for_conversation(&event.room_id).await? else {
                return Ok(());
            };
            (ops.clone(), Some(thread))
        };

        // Only copies the relay sent carry a trustworthy source id
        let recorded = if source.sender == *self.transport.user_id() {
            source.source_event()
        } else {
            None
        };
        let counterpart = match recorded {
            Some(counterpart) => Some(counterpart),
            None => self.find_by_source(&room, thread.as_ref(), target).await?,
        };
        let Some(counterpart) = counterpart else {
            tracing::warn!(event_id = %target, "No counterpart for reacted message");
            return Ok(());
        };

        self.transport.send_reaction(&room, &counterpart, key).await?;
        tracing::debug!(room_id = %room, event_id = %counterpart, "Relayed reaction");
        Ok(())
    }

    /// Find the event in `room` (or in one of its threads) that mirrors `source`
    pub(crate) async fn find_by_source(
        &self,
        room: &RoomId,
        thread: Option<&EventId>,
        source: &EventId,
    ) -> RelayResult<Option<EventId>> {
        let mut from: Option<String> = None;
        for _ in 0..MAX_SEARCH_PAGES {
            let page = match thread {
                Some(root) => {
                    self.transport
                        .thread_events(room, root, from.as_deref())
                        .await?
                }
                None => self.transport.recent_messages(room, from.as_deref()).await?,
            };
            if let Some(found) = page
                .chunk
                .iter()
                .find(|e| e.source_event().as_ref() == Some(source))
            {
                return Ok(Some(found.event_id.clone()));
            }
            match page.next {
                Some(next) => from = Some(next),
                None => break,
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Tracker side channel
    // =========================================================================

    /// Append a message to the ticket in the background
    fn mirror_to_ticket(&self, ticket: Option<u64>, note: String, content: &MessageContent) {
        let (Some(tracker), Some(ticket)) = (self.tracker.clone(), ticket) else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        let media = content.media_url().map(|url| {
            let content_type = content
                .extra
                .get("info")
                .and_then(|info| info.get("mimetype"))
                .and_then(Value::as_str)
                .unwrap_or("application/octet-stream")
                .to_string();
            (url.to_string(), content.body.clone(), content_type)
        });

        tokio::spawn(async move {
            append_note(tracker, transport, ticket, note, media).await;
        });
    }
}

async fn append_note(
    tracker: Arc<dyn Tracker>,
    transport: Arc<dyn Transport>,
    ticket: u64,
    note: String,
    media: Option<(String, String, String)>,
) {
    let mut update = IssueUpdate::note(note);
    if let Some((url, filename, content_type)) = media {
        match transport.download(&url).await {
            Ok(bytes) => {
                update = update.with_file(FileUpload {
                    filename,
                    content_type,
                    bytes,
                });
            }
            Err(e) => {
                tracing::warn!(ticket_id = ticket, error = %e, "Media download failed, note only");
            }
        }
    }

    if let Err(e) = tracker.update_issue(ticket, update).await {
        tracing::warn!(ticket_id = ticket, error = %e, "Failed to append note to ticket");
    }
}
