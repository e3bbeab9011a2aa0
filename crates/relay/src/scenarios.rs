//! End-to-end behaviour of the relay against in-memory collaborators

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use deskrelay_shared::{event_type, meta, EventId, MessageContent, RoomEvent, RoomId, UserId};
use serde_json::json;

use crate::lifecycle::CloseReason;
use crate::relay::Relay;
use crate::testing::{eventually, relay, relay_with, test_config, FakeTracker, FakeTransport, OPS};

const U1: &str = "@u1:example.org";
const U2: &str = "@u2:elsewhere.org";
const OPERATOR: &str = "@op:example.org";
const C1: &str = "!c1:example.org";
const C2: &str = "!c2:example.org";

/// Customer sends `body` in `room`; returns the inbound event and the thread it landed in
async fn customer_says(
    transport: &FakeTransport,
    relay: &Relay,
    room: &str,
    user: &str,
    body: &str,
) -> (RoomEvent, EventId) {
    let event = transport.incoming(room, user, &MessageContent::text(body));
    relay.handle_event(event.clone()).await.unwrap();
    let thread = relay
        .store()
        .thread_for_conversation(&RoomId::from(room))
        .await
        .unwrap()
        .unwrap();
    (event, thread)
}

async fn operator_says(transport: &FakeTransport, relay: &Relay, content: MessageContent) -> RoomEvent {
    let event = transport.incoming(OPS, OPERATOR, &content);
    relay.handle_event(event.clone()).await.unwrap();
    event
}

fn announcements(transport: &FakeTransport) -> Vec<MessageContent> {
    transport
        .sent_messages(OPS)
        .into_iter()
        .map(|(_, content)| content)
        .filter(|c| c.extra.contains_key(meta::REQUESTER) && c.replaces().is_none())
        .collect()
}

fn bodies(transport: &FakeTransport, room: &str) -> Vec<String> {
    transport
        .sent_messages(room)
        .into_iter()
        .map(|(_, content)| content.body)
        .collect()
}

// =============================================================================
// Opening threads
// =============================================================================

#[tokio::test]
async fn test_first_contact_opens_thread_and_greets() {
    let transport = Arc::new(FakeTransport::new());
    transport.set_display_name(U1, "Alice");
    let relay = relay(&transport, None);

    let (event, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;

    let announcements = announcements(&transport);
    assert_eq!(announcements.len(), 1);
    assert!(announcements[0].body.starts_with("[OPEN] "));
    assert!(announcements[0].body.contains("1st"), "{}", announcements[0].body);
    assert_eq!(announcements[0].extra[meta::REQUESTER], json!(U1));
    assert_eq!(announcements[0].extra[meta::ORIGIN], json!("example.org"));

    let forwarded: Vec<_> = transport
        .sent_messages(OPS)
        .into_iter()
        .filter(|(_, c)| c.thread_root() == Some(&thread))
        .collect();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].1.body, "Alice: help me");
    assert_eq!(forwarded[0].1.source_event(), Some(event.event_id));

    assert_eq!(bodies(&transport, C1), vec![test_config().greeting_local]);
}

#[tokio::test]
async fn test_foreign_requester_gets_foreign_greeting() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);

    customer_says(&transport, &relay, C2, U2, "hello").await;

    assert_eq!(bodies(&transport, C2), vec![test_config().greeting_foreign]);
}

#[tokio::test]
async fn test_silent_mode_skips_greeting() {
    let transport = Arc::new(FakeTransport::new());
    let mut config = test_config();
    config.silent = true;
    let relay = relay_with(config, &transport, None);

    customer_says(&transport, &relay, C1, U1, "help me").await;

    assert!(bodies(&transport, C1).is_empty());
}

#[tokio::test]
async fn test_follow_up_messages_reuse_thread() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);

    let (_, first) = customer_says(&transport, &relay, C1, U1, "help me").await;
    let (_, second) = customer_says(&transport, &relay, C1, U1, "still there?").await;

    assert_eq!(first, second);
    assert_eq!(announcements(&transport).len(), 1);
    // Greeting only on the first contact
    assert_eq!(bodies(&transport, C1).len(), 1);
}

#[tokio::test]
async fn test_ordinal_counts_previous_requests() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);

    customer_says(&transport, &relay, C1, U1, "first problem").await;
    customer_says(&transport, &relay, C2, U1, "second problem").await;

    let announcements = announcements(&transport);
    assert_eq!(announcements.len(), 2);
    assert!(announcements[1].body.contains("2nd"), "{}", announcements[1].body);
}

#[tokio::test]
async fn test_concurrent_start_thread_is_idempotent() {
    let transport = Arc::new(FakeTransport::new());
    let relay = Arc::new(relay(&transport, None));
    let room = RoomId::from(C1);
    let user = UserId::from(U1);

    let a = {
        let (relay, room, user) = (relay.clone(), room.clone(), user.clone());
        tokio::spawn(async move { relay.start_thread(&room, &user).await.unwrap() })
    };
    let b = {
        let (relay, room, user) = (relay.clone(), room.clone(), user.clone());
        tokio::spawn(async move { relay.start_thread(&room, &user).await.unwrap() })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.thread_id, b.thread_id);
    assert!(a.created ^ b.created, "exactly one caller creates the thread");
    assert_eq!(announcements(&transport).len(), 1);
}

#[tokio::test]
async fn test_concurrent_customer_messages_keep_order() {
    let transport = Arc::new(FakeTransport::new());
    let relay = Arc::new(relay(&transport, None));
    let (_, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;

    // The first forward is slow; the second message must still land after it
    transport.delay_next_send(OPS, Duration::from_millis(50));
    let first = transport.incoming(C1, U1, &MessageContent::text("first"));
    let second = transport.incoming(C1, U1, &MessageContent::text("second"));
    let a = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.handle_event(first).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let b = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.handle_event(second).await.unwrap() })
    };
    a.await.unwrap();
    b.await.unwrap();

    let in_thread: Vec<String> = transport
        .sent_messages(OPS)
        .into_iter()
        .map(|(_, content)| content)
        .filter(|c| c.thread_root() == Some(&thread))
        .map(|c| c.body)
        .collect();
    assert_eq!(
        in_thread,
        vec![
            format!("{U1}: help me"),
            format!("{U1}: first"),
            format!("{U1}: second")
        ]
    );
}

#[tokio::test]
async fn test_ticket_failure_leaves_ticketless_thread() {
    let transport = Arc::new(FakeTransport::new());
    let tracker = Arc::new(FakeTracker::new());
    tracker.fail_create(true);
    let relay = relay(&transport, Some(&tracker));

    let (_, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;

    assert_eq!(relay.store().ticket_for_thread(&thread).await.unwrap(), None);
    assert_eq!(tracker.issue_count(), 0);

    // A ticketless thread is invisible to the reconciliation pass
    let report = relay.sync_tickets().await.unwrap().unwrap();
    assert_eq!(report.threads, 0);
}

#[tokio::test]
async fn test_new_thread_creates_ticket_and_mirrors_message() {
    let transport = Arc::new(FakeTransport::new());
    transport.set_display_name(U1, "Alice");
    let tracker = Arc::new(FakeTracker::new());
    let relay = relay(&transport, Some(&tracker));

    let (_, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;

    assert_eq!(relay.store().ticket_for_thread(&thread).await.unwrap(), Some(1));
    assert_eq!(
        relay
            .store()
            .ticket_for_conversation(&RoomId::from(C1))
            .await
            .unwrap(),
        Some(1)
    );
    let request = tracker.issue(1).unwrap().request.unwrap();
    assert_eq!(request.reporter, U1);
    assert_eq!(request.origin, "example.org");

    assert!(
        eventually(|| tracker
            .issue(1)
            .is_some_and(|i| i.notes.iter().any(|n| n.body == "Alice: help me")))
        .await
    );
}

#[tokio::test]
async fn test_media_is_attached_to_ticket() {
    let transport = Arc::new(FakeTransport::new());
    let tracker = Arc::new(FakeTracker::new());
    let relay = relay(&transport, Some(&tracker));
    customer_says(&transport, &relay, C1, U1, "help me").await;

    let mut image = MessageContent {
        msgtype: "m.image".to_string(),
        body: "screenshot.png".to_string(),
        ..Default::default()
    };
    image.extra.insert("url".to_string(), json!("mxc://example.org/shot"));
    image.extra.insert("info".to_string(), json!({ "mimetype": "image/png" }));
    let event = transport.incoming(C1, U1, &image);
    relay.handle_event(event).await.unwrap();

    assert!(
        eventually(|| tracker.issue(1).is_some_and(|i| i
            .updates
            .iter()
            .any(|u| u.file.as_ref().is_some_and(|f| f.filename == "screenshot.png"
                && f.content_type == "image/png"
                && f.bytes == b"content of mxc://example.org/shot"))))
        .await
    );
}

// =============================================================================
// Forwarding
// =============================================================================

#[tokio::test]
async fn test_operator_reply_reaches_customer_without_quotes() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);
    let (_, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;

    let reply = MessageContent::text("> <@op2:example.org> internal: customer is on legacy plan\n\nYour plan is fixed")
        .with_html("<mx-reply><blockquote>internal: customer is on legacy plan</blockquote></mx-reply>Your plan is fixed")
        .in_thread(&thread, Some(&EventId::from("$earlier")));
    let reply = operator_says(&transport, &relay, reply).await;

    let delivered = transport
        .sent_messages(C1)
        .into_iter()
        .map(|(_, c)| c)
        .find(|c| c.source_event() == Some(reply.event_id.clone()))
        .unwrap();
    assert_eq!(delivered.body, "Your plan is fixed");
    assert!(!delivered.body.contains("legacy"));
    assert!(!delivered.formatted_body.unwrap_or_default().contains("legacy"));
    assert!(delivered.relates_to.is_none());
}

#[tokio::test]
async fn test_unthreaded_operator_chatter() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);

    operator_says(&transport, &relay, MessageContent::text("coffee anyone?")).await;
    assert!(transport.sent_messages(OPS).is_empty());

    let mut config = test_config();
    config.ignore_unthreaded = false;
    let strict = relay_with(config, &transport, None);
    operator_says(&transport, &strict, MessageContent::text("coffee anyone?")).await;

    let notices = transport.sent_messages(OPS);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].1.is_notice());
    assert!(notices[0].1.body.contains("support thread"));
}

#[tokio::test]
async fn test_customer_edit_is_forwarded_as_edit() {
    let transport = Arc::new(FakeTransport::new());
    transport.set_display_name(U1, "Alice");
    let relay = relay(&transport, None);
    let (original, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;
    let (copy, _) = transport
        .sent_messages(OPS)
        .into_iter()
        .find(|(_, c)| c.thread_root() == Some(&thread))
        .unwrap();

    let edit = MessageContent::text("help me please").into_edit_of(&original.event_id);
    let edit = transport.incoming(C1, U1, &edit);
    relay.handle_event(edit).await.unwrap();

    let forwarded = transport
        .sent_messages(OPS)
        .into_iter()
        .map(|(_, c)| c)
        .find(|c| c.replaces() == Some(&copy))
        .unwrap();
    assert_eq!(forwarded.new_content.unwrap().body, "Alice: help me please");
    // No second thread message for the edit
    assert_eq!(announcements(&transport).len(), 1);
}

#[tokio::test]
async fn test_reactions_round_trip() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);
    let (customer_event, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;

    // Operator reacts to the forwarded copy
    let (copy, _) = transport
        .sent_messages(OPS)
        .into_iter()
        .find(|(_, c)| c.source_event() == Some(customer_event.event_id.clone()))
        .unwrap();
    let reaction = transport.incoming_reaction(OPS, OPERATOR, &copy, "👍");
    relay.handle_event(reaction).await.unwrap();
    assert_eq!(
        transport.sent_reactions(C1),
        vec![(customer_event.event_id.clone(), "👍".to_string())]
    );

    // Customer reacts to a delivered operator reply
    let reply = operator_says(
        &transport,
        &relay,
        MessageContent::text("on it").in_thread(&thread, None),
    )
    .await;
    let (delivered, _) = transport
        .sent_messages(C1)
        .into_iter()
        .find(|(_, c)| c.source_event() == Some(reply.event_id.clone()))
        .unwrap();
    let reaction = transport.incoming_reaction(C1, U1, &delivered, "❤️");
    relay.handle_event(reaction).await.unwrap();
    assert_eq!(
        transport.sent_reactions(OPS),
        vec![(reply.event_id, "❤️".to_string())]
    );
}

#[tokio::test]
async fn test_unresolvable_reaction_is_dropped() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);
    customer_says(&transport, &relay, C1, U1, "help me").await;

    let reaction = transport.incoming_reaction(C1, U1, &EventId::from("$gone"), "👀");
    relay.handle_event(reaction).await.unwrap();

    assert!(transport.sent_reactions(OPS).is_empty());
}

#[tokio::test]
async fn test_customer_cannot_redirect_reactions() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);
    let (_, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;

    // A customer message claiming to mirror the announcement
    let forged = transport.incoming(
        C1,
        U1,
        &MessageContent::text("look here").with_source_event(&thread),
    );
    relay.handle_event(forged.clone()).await.unwrap();
    let (copy, _) = transport
        .sent_messages(OPS)
        .into_iter()
        .find(|(_, c)| c.source_event() == Some(forged.event_id.clone()))
        .unwrap();

    let reaction = transport.incoming_reaction(C1, U1, &forged.event_id, "🔥");
    relay.handle_event(reaction).await.unwrap();

    assert_eq!(transport.sent_reactions(OPS), vec![(copy, "🔥".to_string())]);
}

#[tokio::test]
async fn test_membership_invite_and_last_leave() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);

    let invite = RoomEvent {
        event_id: EventId::from("$invite"),
        room_id: RoomId::from(C1),
        sender: UserId::from(U1),
        event_type: event_type::MEMBER.to_string(),
        content: json!({ "membership": "invite" }),
        state_key: Some(crate::testing::BOT.to_string()),
        ..Default::default()
    };
    relay.handle_event(invite).await.unwrap();
    assert_eq!(transport.joined(), vec![RoomId::from(C1)]);

    let (_, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;
    transport.set_members(C1, &[crate::testing::BOT]);
    let leave = RoomEvent {
        event_id: EventId::from("$leave"),
        room_id: RoomId::from(C1),
        sender: UserId::from(U1),
        event_type: event_type::MEMBER.to_string(),
        content: json!({ "membership": "leave" }),
        state_key: Some(U1.to_string()),
        ..Default::default()
    };
    relay.handle_event(leave).await.unwrap();

    assert_eq!(relay.store().conversation_for_thread(&thread).await.unwrap(), None);
    assert_eq!(transport.left(), vec![RoomId::from(C1)]);
}

// =============================================================================
// Closing
// =============================================================================

#[tokio::test]
async fn test_operator_done_closes_thread_and_ticket() {
    let transport = Arc::new(FakeTransport::new());
    let tracker = Arc::new(FakeTracker::new());
    let relay = relay(&transport, Some(&tracker));
    let (_, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;
    tracker.add_attachment(1, 77);

    operator_says(
        &transport,
        &relay,
        MessageContent::text("@support: done").in_thread(&thread, None),
    )
    .await;

    let ops = transport.sent_messages(OPS);
    let done_notices: Vec<_> = ops
        .iter()
        .filter(|(_, c)| c.is_notice() && c.thread_root() == Some(&thread))
        .filter(|(_, c)| c.body.to_lowercase().contains("done"))
        .collect();
    assert_eq!(done_notices.len(), 1);

    let announcement_edit = ops
        .iter()
        .find(|(_, c)| c.replaces() == Some(&thread))
        .map(|(_, c)| c.clone())
        .unwrap();
    assert!(announcement_edit
        .new_content
        .unwrap()
        .body
        .starts_with("[DONE] "));

    let issue = tracker.issue(1).unwrap();
    assert_eq!(issue.status, "closed");
    assert_eq!(tracker.deleted_attachments(), vec![77]);

    assert_eq!(
        bodies(&transport, C1).last(),
        Some(&test_config().farewell)
    );
    assert_eq!(transport.left(), vec![RoomId::from(C1)]);
}

#[tokio::test]
async fn test_close_removes_every_mapping() {
    let transport = Arc::new(FakeTransport::new());
    let tracker = Arc::new(FakeTracker::new());
    let relay = relay(&transport, Some(&tracker));
    let room = RoomId::from(C1);
    let (_, thread) = customer_says(&transport, &relay, C1, U1, "help me").await;

    relay
        .close_thread(
            &thread,
            CloseReason::Command {
                operator: UserId::from(OPERATOR),
            },
        )
        .await
        .unwrap();

    let store = relay.store();
    assert_eq!(store.conversation_for_thread(&thread).await.unwrap(), None);
    assert_eq!(store.thread_for_conversation(&room).await.unwrap(), None);
    assert_eq!(store.ticket_for_thread(&thread).await.unwrap(), None);
    assert_eq!(store.ticket_for_conversation(&room).await.unwrap(), None);

    // The next message opens a fresh thread
    let (_, reopened) = customer_says(&transport, &relay, C1, U1, "one more thing").await;
    assert_ne!(reopened, thread);
}

#[tokio::test]
async fn test_message_during_close_opens_fresh_thread() {
    let transport = Arc::new(FakeTransport::new());
    let relay = Arc::new(relay(&transport, None));
    let (_, closing) = customer_says(&transport, &relay, C1, U1, "help me").await;

    // Stall the close on its first notice so the customer writes mid-close
    transport.delay_next_send(OPS, Duration::from_millis(50));
    let close = {
        let (relay, thread) = (relay.clone(), closing.clone());
        tokio::spawn(async move {
            relay
                .close_thread(
                    &thread,
                    CloseReason::Command {
                        operator: UserId::from(OPERATOR),
                    },
                )
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let late = transport.incoming(C1, U1, &MessageContent::text("are you still there?"));
    relay.handle_event(late.clone()).await.unwrap();
    close.await.unwrap();

    let reopened = relay
        .store()
        .thread_for_conversation(&RoomId::from(C1))
        .await
        .unwrap()
        .unwrap();
    assert_ne!(reopened, closing);
    assert_eq!(
        relay.store().conversation_for_thread(&reopened).await.unwrap(),
        Some(RoomId::from(C1))
    );

    let (_, copy) = transport
        .sent_messages(OPS)
        .into_iter()
        .find(|(_, c)| c.source_event() == Some(late.event_id.clone()))
        .unwrap();
    assert_eq!(copy.thread_root(), Some(&reopened));
}

#[tokio::test]
async fn test_done_in_unlinked_thread_reports_back() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);
    let stray = EventId::from("$not-a-support-thread");

    operator_says(
        &transport,
        &relay,
        MessageContent::text("@support: done").in_thread(&stray, None),
    )
    .await;

    let notices = transport.sent_messages(OPS);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].1.body.contains("not linked"));
}

#[tokio::test]
async fn test_age_sweep_only_closes_stale_threads() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);
    let (_, stale) = customer_says(&transport, &relay, C1, U1, "old problem").await;
    transport.age_all_events(Duration::from_secs(8 * 24 * 60 * 60));
    let (_, fresh) = customer_says(&transport, &relay, C2, U2, "new problem").await;

    let closed = relay.sweep_stale_threads().await.unwrap();

    assert_eq!(closed, 1);
    assert_eq!(relay.store().conversation_for_thread(&stale).await.unwrap(), None);
    assert_eq!(
        relay.store().conversation_for_thread(&fresh).await.unwrap(),
        Some(RoomId::from(C2))
    );
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Open a ticket-backed thread and wait for the first message to be mirrored
async fn ticketed_thread(transport: &FakeTransport, tracker: &FakeTracker, relay: &Relay) -> EventId {
    let (_, thread) = customer_says(transport, relay, C1, U1, "help me").await;
    assert!(eventually(|| tracker.issue(1).is_some_and(|i| !i.notes.is_empty())).await);
    thread
}

#[tokio::test]
async fn test_public_note_syncs_once_to_both_sides() {
    let transport = Arc::new(FakeTransport::new());
    let tracker = Arc::new(FakeTracker::new());
    let relay = relay(&transport, Some(&tracker));
    let thread = ticketed_thread(&transport, &tracker, &relay).await;
    tracker.add_note(1, 5, "> what the customer said earlier\n\nPlease restart the router", false);

    let report = relay.sync_tickets().await.unwrap().unwrap();
    assert_eq!(report.notes, 1);

    let synced: Vec<_> = transport
        .sent_messages(OPS)
        .into_iter()
        .filter(|(_, c)| c.body.starts_with("synced note #5"))
        .collect();
    assert_eq!(synced.len(), 1);
    assert_eq!(synced[0].1.thread_root(), Some(&thread));

    let delivered: Vec<_> = transport
        .sent_messages(C1)
        .into_iter()
        .filter(|(_, c)| c.source_event() == Some(synced[0].0.clone()))
        .collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1.body, "Please restart the router");

    // Second pass: nothing new
    let ops_before = transport.sent_messages(OPS).len();
    let customer_before = transport.sent_messages(C1).len();
    let report = relay.sync_tickets().await.unwrap().unwrap();
    assert_eq!(report.notes, 0);
    assert_eq!(transport.sent_messages(OPS).len(), ops_before);
    assert_eq!(transport.sent_messages(C1).len(), customer_before);
}

#[tokio::test]
async fn test_private_note_stays_with_operators() {
    let transport = Arc::new(FakeTransport::new());
    let tracker = Arc::new(FakeTracker::new());
    let relay = relay(&transport, Some(&tracker));
    let thread = ticketed_thread(&transport, &tracker, &relay).await;
    let customer_before = transport.sent_messages(C1).len();
    tracker.add_note(1, 6, "customer owes us money", true);

    relay.sync_tickets().await.unwrap();

    assert!(bodies(&transport, OPS)
        .iter()
        .any(|b| b.starts_with("synced private note #6")));
    assert_eq!(transport.sent_messages(C1).len(), customer_before);
    assert!(relay.store().is_note_synced(&thread, 6).await.unwrap());
}

#[tokio::test]
async fn test_relay_authored_notes_are_not_replayed() {
    let transport = Arc::new(FakeTransport::new());
    let tracker = Arc::new(FakeTracker::new());
    let relay = relay(&transport, Some(&tracker));
    ticketed_thread(&transport, &tracker, &relay).await;

    let report = relay.sync_tickets().await.unwrap().unwrap();

    assert_eq!(report.notes, 0);
    assert!(!bodies(&transport, OPS).iter().any(|b| b.starts_with("synced")));
}

#[tokio::test]
async fn test_undeliverable_note_is_reported_and_not_retried() {
    let transport = Arc::new(FakeTransport::new());
    let tracker = Arc::new(FakeTracker::new());
    let relay = relay(&transport, Some(&tracker));
    let thread = ticketed_thread(&transport, &tracker, &relay).await;
    transport.fail_sends_to(C1);
    tracker.add_note(1, 8, "try turning it off and on", false);

    relay.sync_tickets().await.unwrap();
    let ops = bodies(&transport, OPS);
    assert_eq!(ops.iter().filter(|b| b.starts_with("synced note #8")).count(), 1);
    assert_eq!(
        ops.iter()
            .filter(|b| b.contains("could not be delivered"))
            .count(),
        1
    );
    assert!(relay.store().is_note_synced(&thread, 8).await.unwrap());

    relay.sync_tickets().await.unwrap();
    assert_eq!(bodies(&transport, OPS).len(), ops.len());
}

#[tokio::test]
async fn test_ticket_closed_in_tracker_closes_thread() {
    let transport = Arc::new(FakeTransport::new());
    let tracker = Arc::new(FakeTracker::new());
    let relay = relay(&transport, Some(&tracker));
    let thread = ticketed_thread(&transport, &tracker, &relay).await;
    tracker.add_attachment(1, 12);
    tracker.set_status(1, "closed");

    let report = relay.sync_tickets().await.unwrap().unwrap();

    assert_eq!(report.closed, 1);
    assert_eq!(relay.store().conversation_for_thread(&thread).await.unwrap(), None);
    assert!(bodies(&transport, OPS)
        .iter()
        .any(|b| b.contains("closed in the tracker")));
    // The tracker already closed it; the relay does not write the status again
    let issue = tracker.issue(1).unwrap();
    assert!(issue.updates.iter().all(|u| u.status.is_none()));
    assert_eq!(tracker.deleted_attachments(), vec![12]);
}

#[tokio::test]
async fn test_sync_is_skipped_without_tracker() {
    let transport = Arc::new(FakeTransport::new());
    let relay = relay(&transport, None);

    assert_eq!(relay.sync_tickets().await.unwrap(), None);
}
