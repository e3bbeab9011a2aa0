//! The relay core and inbound event dispatch

use std::sync::Arc;

use deskrelay_shared::{event_type, EventId, MessageContent, RoomEvent, RoomId};
use deskrelay_tracker::Tracker;

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::identity::IdentityResolver;
use crate::lifecycle::CloseReason;
use crate::lock::KeyedLock;
use crate::store::MappingStore;
use crate::sync::TicketSynchronizer;
use crate::transport::Transport;

/// Text customers see when their message could not be delivered
pub(crate) const APOLOGY: &str =
    "Sorry, your message could not be delivered to our support team. Please try again later.";

/// Support-desk relay between customer conversations and the operator workspace
pub struct Relay {
    pub(crate) config: Config,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) tracker: Option<Arc<dyn Tracker>>,
    pub(crate) store: MappingStore,
    pub(crate) identities: IdentityResolver,
    pub(crate) locks: KeyedLock,
    pub(crate) synchronizer: TicketSynchronizer,
}

impl Relay {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        tracker: Option<Arc<dyn Tracker>>,
    ) -> Self {
        let store = MappingStore::new(
            Arc::clone(&transport),
            config.operator_room.clone(),
            config.mapping_cache_size,
        );
        let identities = IdentityResolver::new(Arc::clone(&transport), config.identity_cache_size);
        Self {
            config,
            transport,
            tracker,
            store,
            identities,
            locks: KeyedLock::new(),
            synchronizer: TicketSynchronizer::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    /// Whether a reconciliation pass is in progress
    pub fn is_syncing(&self) -> bool {
        self.synchronizer.is_running()
    }

    /// Make sure the relay is a member of the operator workspace
    pub async fn join_operator_room(&self) -> RelayResult<()> {
        self.transport.join(&self.config.operator_room).await?;
        tracing::info!(room_id = %self.config.operator_room, "Joined operator room");
        Ok(())
    }

    /// Entry point for every inbound transport event
    pub async fn handle_event(&self, event: RoomEvent) -> RelayResult<()> {
        if &event.sender == self.transport.user_id() {
            return Ok(());
        }

        let event = if event.is_encrypted() {
            self.transport.decrypt(event).await?
        } else {
            event
        };

        match event.event_type.as_str() {
            event_type::MESSAGE if event.room_id == self.config.operator_room => {
                self.handle_operator_message(&event).await
            }
            event_type::MESSAGE => self.handle_customer_message(&event).await,
            event_type::REACTION => {
                self.handle_reaction(&event).await;
                Ok(())
            }
            event_type::MEMBER => self.handle_membership(&event).await,
            other => {
                tracing::trace!(event_id = %event.event_id, event_type = %other, "Ignoring event");
                Ok(())
            }
        }
    }

    async fn handle_membership(&self, event: &RoomEvent) -> RelayResult<()> {
        let member = event.membership()?;
        let target = event.state_key.as_deref().unwrap_or_default();

        if member.is_invite() {
            if target == self.transport.user_id().as_str() {
                self.transport.join(&event.room_id).await?;
                tracing::info!(room_id = %event.room_id, inviter = %event.sender, "Accepted invite");
            }
            return Ok(());
        }

        if !member.is_leave() || event.room_id == self.config.operator_room {
            return Ok(());
        }

        let members = self.transport.joined_members(&event.room_id).await?;
        if members.iter().any(|m| m != self.transport.user_id()) {
            return Ok(());
        }

        let Some(thread) = self.store.thread_for_conversation(&event.room_id).await? else {
            tracing::debug!(room_id = %event.room_id, "Last participant left an unmapped room");
            return Ok(());
        };
        tracing::info!(room_id = %event.room_id, thread_id = %thread, "Customer left, closing thread");
        self.close_thread(&thread, CloseReason::CustomerLeft).await?;
        Ok(())
    }

    /// Send a notice, retrying once without its reply relation; failures are only logged
    pub(crate) async fn send_notice(
        &self,
        room: &RoomId,
        mut content: MessageContent,
    ) -> Option<EventId> {
        match self.transport.send_message(room, &content).await {
            Ok(id) => return Some(id),
            Err(e) => {
                let Some(relation) = content.relates_to.as_mut().filter(|r| r.in_reply_to.is_some())
                else {
                    tracing::warn!(room_id = %room, error = %e, "Failed to send notice");
                    return None;
                };
                tracing::debug!(room_id = %room, error = %e, "Notice failed, retrying without reply");
                relation.in_reply_to = None;
                relation.is_falling_back = None;
                if relation.rel_type.is_none() {
                    content.relates_to = None;
                }
            }
        }

        match self.transport.send_message(room, &content).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(room_id = %room, error = %e, "Failed to send notice");
                None
            }
        }
    }

    /// Tell operators about a failure affecting their side, including the raw error
    pub(crate) async fn report_to_operators(
        &self,
        thread: Option<&EventId>,
        context: &str,
        error: &RelayError,
    ) {
        let mut notice = MessageContent::notice(format!("{context}: {error}"));
        if let Some(thread) = thread {
            notice = notice.in_thread(thread, None);
        }
        self.send_notice(&self.config.operator_room, notice).await;
    }
}
