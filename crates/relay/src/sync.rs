//! Reconciliation with the ticket tracker
//!
//! Pull-based: every pass walks all threads, replays unsynchronized tracker
//! notes and closes threads whose ticket reached a terminal status. At most one
//! pass runs at a time; a pass that finds another one running returns at once.

use std::sync::atomic::{AtomicBool, Ordering};

use deskrelay_shared::{EventId, MessageContent};
use deskrelay_tracker::Tracker;

use crate::error::RelayResult;
use crate::format;
use crate::lifecycle::{CloseOutcome, CloseReason};
use crate::relay::Relay;

/// Single-slot guard for the reconciliation pass
#[derive(Debug, Default)]
pub struct TicketSynchronizer {
    running: AtomicBool,
}

/// Held for the duration of a pass; clears the flag on drop
pub struct SyncPass<'a> {
    running: &'a AtomicBool,
}

impl Drop for SyncPass<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl TicketSynchronizer {
    /// Claim the slot, or `None` if a pass is already running
    pub fn try_begin(&self) -> Option<SyncPass<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncPass {
                running: &self.running,
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Counters of one reconciliation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub threads: usize,
    pub notes: usize,
    pub closed: usize,
}

impl Relay {
    /// Run one reconciliation pass; `None` when disabled or already running
    pub async fn sync_tickets(&self) -> RelayResult<Option<SyncReport>> {
        let Some(tracker) = self.tracker.as_deref() else {
            tracing::debug!("Tracker integration disabled, skipping sync");
            return Ok(None);
        };
        let Some(_pass) = self.synchronizer.try_begin() else {
            tracing::debug!("Sync already running, skipping");
            return Ok(None);
        };

        let own_user = match tracker.current_user_id().await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Could not resolve tracker account");
                None
            }
        };

        let mut report = SyncReport::default();
        for root in self.store.thread_roots().await? {
            let thread = root.event_id;
            match self.sync_thread(tracker, &thread, own_user, &mut report).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(thread_id = %thread, error = %e, "Thread sync abandoned");
                }
            }
        }

        tracing::info!(
            threads = report.threads,
            notes = report.notes,
            closed = report.closed,
            "Ticket sync completed"
        );
        Ok(Some(report))
    }

    async fn sync_thread(
        &self,
        tracker: &dyn Tracker,
        thread: &EventId,
        own_user: Option<u64>,
        report: &mut SyncReport,
    ) -> RelayResult<()> {
        let Some(room) = self.store.conversation_for_thread(thread).await? else {
            return Ok(());
        };
        let Some(ticket) = self.store.ticket_for_thread(thread).await? else {
            return Ok(());
        };
        report.threads += 1;
        let ops = &self.config.operator_room;

        for note in tracker.get_notes(ticket).await? {
            if self.store.is_note_synced(thread, note.id).await? {
                continue;
            }
            if own_user.is_some() && note.author_id == own_user {
                self.store.mark_note_synced(thread, note.id).await?;
                continue;
            }

            let label = if note.is_private {
                "synced private note"
            } else {
                "synced note"
            };
            let text = match &note.author_name {
                Some(author) => format!("{label} #{} from {author}:\n{}", note.id, note.body),
                None => format!("{label} #{}:\n{}", note.id, note.body),
            };
            let posted = self
                .transport
                .send_message(ops, &MessageContent::notice(text).in_thread(thread, None))
                .await?;

            if !note.is_private {
                let cleaned = format::strip_quotes(&note.body);
                if !cleaned.is_empty() {
                    let copy = MessageContent::text(cleaned).with_source_event(&posted);
                    if let Err(e) = self.transport.send_message(&room, &copy).await {
                        tracing::warn!(
                            thread_id = %thread,
                            note_id = note.id,
                            error = %e,
                            "Note not delivered to customer"
                        );
                        let notice = MessageContent::notice(format!(
                            "Note #{} could not be delivered to the customer: {e}",
                            note.id
                        ))
                        .in_thread(thread, Some(&posted));
                        self.send_notice(ops, notice).await;
                    }
                }
            }

            self.store.mark_note_synced(thread, note.id).await?;
            report.notes += 1;
        }

        let issue = tracker.get_issue(ticket, false).await?;
        if tracker.is_terminal(&issue) {
            tracing::info!(thread_id = %thread, ticket_id = ticket, "Ticket closed in tracker");
            if self.close_thread(thread, CloseReason::Tracker).await? == CloseOutcome::Closed {
                report.closed += 1;
            }
        }
        Ok(())
    }

    /// Close every thread whose last activity predates the retention window
    pub async fn sweep_stale_threads(&self) -> RelayResult<usize> {
        let mut closed = 0;
        for root in self.store.thread_roots().await? {
            let thread = root.event_id;
            if self.store.conversation_for_thread(&thread).await?.is_none() {
                continue;
            }
            match self.close_thread(&thread, CloseReason::AgeSweep).await {
                Ok(CloseOutcome::Closed) => closed += 1,
                Ok(CloseOutcome::Skipped) => {}
                Err(e) => {
                    tracing::warn!(thread_id = %thread, error = %e, "Age sweep failed for thread");
                }
            }
        }
        if closed > 0 {
            tracing::info!(closed, "Age sweep closed stale threads");
        }
        Ok(closed)
    }
}
