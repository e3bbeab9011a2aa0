//! Persisted mappings between conversations, threads and tickets
//!
//! Every mapping is a small account-data record named `<prefix><id>` holding a
//! single `id` field. Records are never deleted; removal writes an empty id.
//! An LRU cache sits in front of the transport and is updated on every write,
//! which is sound because nothing but this process writes these records.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use deskrelay_shared::{meta, EventId, RoomEvent, RoomId, UserId};
use lru::LruCache;

use crate::error::RelayResult;
use crate::transport::Transport;

const ID_FIELD: &str = "id";
const SYNCED_FIELD: &str = "synced";

/// Namespace of a mapping record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// conversation -> thread and thread -> conversation
    Thread,
    /// thread -> ticket and conversation -> ticket
    Ticket,
}

impl MappingKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            MappingKind::Thread => "io.deskrelay.thread.",
            MappingKind::Ticket => "io.deskrelay.ticket.",
        }
    }

    fn record_name(&self, id: &str) -> String {
        format!("{}{}", self.prefix(), id)
    }
}

fn note_record_name(thread: &EventId, note_id: u64) -> String {
    format!("io.deskrelay.note.{thread}.{note_id}")
}

/// Which announcements to count in [`MappingStore::count_references`]
#[derive(Debug, Clone, Copy)]
pub enum ReferenceFilter<'a> {
    Requester(&'a UserId),
    Origin(&'a str),
}

impl ReferenceFilter<'_> {
    fn matches(&self, root: &RoomEvent) -> bool {
        let (key, wanted) = match self {
            ReferenceFilter::Requester(user) => (meta::REQUESTER, user.as_str()),
            ReferenceFilter::Origin(origin) => (meta::ORIGIN, *origin),
        };
        root.content.get(key).and_then(|v| v.as_str()) == Some(wanted)
    }
}

pub struct MappingStore {
    transport: Arc<dyn Transport>,
    operator_room: RoomId,
    cache: Mutex<LruCache<String, String>>,
}

impl MappingStore {
    pub fn new(transport: Arc<dyn Transport>, operator_room: RoomId, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            transport,
            operator_room,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Read a mapping, cache first
    pub async fn get(&self, kind: MappingKind, id: &str) -> RelayResult<Option<String>> {
        let name = kind.record_name(id);
        if let Some(value) = self.cached(&name) {
            return Ok(non_empty(value));
        }

        let value = self
            .transport
            .account_data(&name)
            .await?
            .and_then(|mut record| record.remove(ID_FIELD))
            .unwrap_or_default();
        self.remember(name, value.clone());
        Ok(non_empty(value))
    }

    /// Write one direction of a mapping
    pub async fn set(&self, kind: MappingKind, from: &str, to: &str) -> RelayResult<()> {
        let name = kind.record_name(from);
        let record = HashMap::from([(ID_FIELD.to_string(), to.to_string())]);
        self.transport.set_account_data(&name, &record).await?;
        self.remember(name, to.to_string());
        tracing::debug!(kind = ?kind, from = %from, "Mapping written");
        Ok(())
    }

    pub async fn remove(&self, kind: MappingKind, id: &str) -> RelayResult<()> {
        self.set(kind, id, "").await
    }

    // =========================================================================
    // Typed views
    // =========================================================================

    /// Thread of a conversation; a one-sided mapping counts as none
    pub async fn thread_for_conversation(&self, room: &RoomId) -> RelayResult<Option<EventId>> {
        let Some(thread) = self.get(MappingKind::Thread, room.as_str()).await? else {
            return Ok(None);
        };
        let back = self.get(MappingKind::Thread, &thread).await?;
        if back.as_deref() != Some(room.as_str()) {
            tracing::debug!(room_id = %room, thread_id = %thread, "Ignoring one-sided mapping");
            return Ok(None);
        }
        Ok(Some(EventId::from(thread)))
    }

    /// Conversation of a thread; a one-sided mapping counts as none
    pub async fn conversation_for_thread(&self, thread: &EventId) -> RelayResult<Option<RoomId>> {
        let Some(room) = self.get(MappingKind::Thread, thread.as_str()).await? else {
            return Ok(None);
        };
        let back = self.get(MappingKind::Thread, &room).await?;
        if back.as_deref() != Some(thread.as_str()) {
            tracing::debug!(room_id = %room, thread_id = %thread, "Ignoring one-sided mapping");
            return Ok(None);
        }
        Ok(Some(RoomId::from(room)))
    }

    pub async fn ticket_for_thread(&self, thread: &EventId) -> RelayResult<Option<u64>> {
        self.ticket_for(thread.as_str()).await
    }

    pub async fn ticket_for_conversation(&self, room: &RoomId) -> RelayResult<Option<u64>> {
        self.ticket_for(room.as_str()).await
    }

    async fn ticket_for(&self, id: &str) -> RelayResult<Option<u64>> {
        let ticket = self.get(MappingKind::Ticket, id).await?;
        Ok(ticket.and_then(|t| match t.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(id = %id, value = %t, "Ignoring malformed ticket mapping");
                None
            }
        }))
    }

    /// Write both directions of conversation <-> thread. Callers hold the conversation lock.
    pub async fn link_thread(&self, room: &RoomId, thread: &EventId) -> RelayResult<()> {
        self.set(MappingKind::Thread, room.as_str(), thread.as_str())
            .await?;
        self.set(MappingKind::Thread, thread.as_str(), room.as_str())
            .await
    }

    pub async fn link_ticket(&self, room: &RoomId, thread: &EventId, ticket: u64) -> RelayResult<()> {
        let ticket = ticket.to_string();
        self.set(MappingKind::Ticket, thread.as_str(), &ticket).await?;
        self.set(MappingKind::Ticket, room.as_str(), &ticket).await
    }

    /// Clear every mapping direction of a thread
    pub async fn unlink(&self, room: Option<&RoomId>, thread: &EventId) -> RelayResult<()> {
        self.remove(MappingKind::Thread, thread.as_str()).await?;
        self.remove(MappingKind::Ticket, thread.as_str()).await?;
        if let Some(room) = room {
            self.remove(MappingKind::Thread, room.as_str()).await?;
            self.remove(MappingKind::Ticket, room.as_str()).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Note markers
    // =========================================================================

    pub async fn is_note_synced(&self, thread: &EventId, note_id: u64) -> RelayResult<bool> {
        let name = note_record_name(thread, note_id);
        if let Some(value) = self.cached(&name) {
            return Ok(value == "true");
        }
        let synced = self
            .transport
            .account_data(&name)
            .await?
            .and_then(|mut record| record.remove(SYNCED_FIELD))
            .unwrap_or_default();
        self.remember(name, synced.clone());
        Ok(synced == "true")
    }

    pub async fn mark_note_synced(&self, thread: &EventId, note_id: u64) -> RelayResult<()> {
        let name = note_record_name(thread, note_id);
        let record = HashMap::from([(SYNCED_FIELD.to_string(), "true".to_string())]);
        self.transport.set_account_data(&name, &record).await?;
        self.remember(name, "true".to_string());
        Ok(())
    }

    // =========================================================================
    // Scans
    // =========================================================================

    /// Every thread root in the operator workspace, newest first
    pub async fn thread_roots(&self) -> RelayResult<Vec<RoomEvent>> {
        let mut roots = Vec::new();
        let mut from: Option<String> = None;
        loop {
            let page = self
                .transport
                .list_threads(&self.operator_room, from.as_deref())
                .await?;
            roots.extend(page.chunk);
            match page.next {
                Some(next) => from = Some(next),
                None => break,
            }
        }
        Ok(roots)
    }

    /// Number of announcements whose embedded attribution matches `filter`
    pub async fn count_references(&self, filter: ReferenceFilter<'_>) -> RelayResult<usize> {
        let roots = self.thread_roots().await?;
        Ok(roots.iter().filter(|root| filter.matches(root)).count())
    }

    fn cached(&self, name: &str) -> Option<String> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.get(name).cloned()
    }

    fn remember(&self, name: String, value: String) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.put(name, value);
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
