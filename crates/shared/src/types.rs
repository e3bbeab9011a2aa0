//! Common types used across DeskRelay

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventError;

// =============================================================================
// ID Wrappers
// =============================================================================

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id!(
    /// A room: either a customer conversation or the operator workspace
    RoomId
);
opaque_id!(
    /// An event id. A thread is identified by the id of its root event
    EventId
);
opaque_id!(
    /// A user id of the form `@localpart:server`
    UserId
);

impl UserId {
    /// The part between the sigil and the first colon
    pub fn localpart(&self) -> &str {
        let raw = self.0.strip_prefix('@').unwrap_or(&self.0);
        raw.split_once(':').map(|(local, _)| local).unwrap_or(raw)
    }

    /// The server the user belongs to, used as the request's origin
    pub fn server_name(&self) -> Result<&str, EventError> {
        self.0
            .split_once(':')
            .map(|(_, server)| server)
            .filter(|server| !server.is_empty())
            .ok_or_else(|| EventError::InvalidId(self.0.clone()))
    }
}

// =============================================================================
// Protocol constants
// =============================================================================

pub mod event_type {
    pub const MESSAGE: &str = "m.room.message";
    pub const REACTION: &str = "m.reaction";
    pub const MEMBER: &str = "m.room.member";
    pub const ENCRYPTED: &str = "m.room.encrypted";
}

pub mod msgtype {
    pub const TEXT: &str = "m.text";
    pub const NOTICE: &str = "m.notice";
    pub const EMOTE: &str = "m.emote";
    pub const FILE: &str = "m.file";
    pub const IMAGE: &str = "m.image";
}

pub mod rel_type {
    pub const THREAD: &str = "m.thread";
    pub const ANNOTATION: &str = "m.annotation";
    pub const REPLACE: &str = "m.replace";
}

/// Custom content keys the relay embeds into events it sends
pub mod meta {
    /// Id of the event on the other side that this event mirrors
    pub const SOURCE_EVENT: &str = "io.deskrelay.source_event";
    /// Requester of a thread, embedded into the announcement
    pub const REQUESTER: &str = "io.deskrelay.requester";
    /// Origin (server) of the requester, embedded into the announcement
    pub const ORIGIN: &str = "io.deskrelay.origin";
}

pub const HTML_FORMAT: &str = "org.matrix.custom.html";

// =============================================================================
// Events
// =============================================================================

/// A raw room event as delivered by the transport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub event_id: EventId,
    #[serde(default)]
    pub room_id: RoomId,
    pub sender: UserId,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub origin_server_ts: i64,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
}

impl RoomEvent {
    /// Decode the content of an `m.room.message` event
    pub fn message_content(&self) -> Result<MessageContent, EventError> {
        self.expect_type(event_type::MESSAGE)?;
        Ok(serde_json::from_value(self.content.clone())?)
    }

    /// Decode the content of an `m.reaction` event
    pub fn reaction(&self) -> Result<ReactionContent, EventError> {
        self.expect_type(event_type::REACTION)?;
        Ok(serde_json::from_value(self.content.clone())?)
    }

    /// Decode the content of an `m.room.member` event
    pub fn membership(&self) -> Result<MemberContent, EventError> {
        self.expect_type(event_type::MEMBER)?;
        Ok(serde_json::from_value(self.content.clone())?)
    }

    pub fn is_encrypted(&self) -> bool {
        self.event_type == event_type::ENCRYPTED
    }

    /// The mirrored-event id embedded by the relay, if any
    pub fn source_event(&self) -> Option<EventId> {
        self.content
            .get(meta::SOURCE_EVENT)
            .and_then(Value::as_str)
            .map(EventId::from)
    }

    /// Root of the thread this event belongs to, if it carries a thread relation
    pub fn thread_root(&self) -> Option<EventId> {
        let relates_to = self.content.get("m.relates_to")?;
        if relates_to.get("rel_type").and_then(Value::as_str) != Some(rel_type::THREAD) {
            return None;
        }
        relates_to
            .get("event_id")
            .and_then(Value::as_str)
            .map(EventId::from)
    }

    fn expect_type(&self, expected: &'static str) -> Result<(), EventError> {
        if self.event_type == expected {
            Ok(())
        } else {
            Err(EventError::UnexpectedType {
                expected,
                actual: self.event_type.clone(),
            })
        }
    }
}

/// Content of an `m.room.message` event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub msgtype: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
    #[serde(
        rename = "m.relates_to",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub relates_to: Option<RelatesTo>,
    #[serde(
        rename = "m.new_content",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub new_content: Option<Box<MessageContent>>,
    /// Everything else (media urls, info blocks, relay metadata)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: msgtype::TEXT.to_string(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn notice(body: impl Into<String>) -> Self {
        Self {
            msgtype: msgtype::NOTICE.to_string(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Attach an HTML rendition of the body
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.format = Some(HTML_FORMAT.to_string());
        self.formatted_body = Some(html.into());
        self
    }

    /// Place the message into a thread, optionally as a reply to a specific event
    pub fn in_thread(mut self, root: &EventId, reply_to: Option<&EventId>) -> Self {
        self.relates_to = Some(RelatesTo {
            rel_type: Some(rel_type::THREAD.to_string()),
            event_id: Some(root.clone()),
            key: None,
            in_reply_to: Some(InReplyTo {
                event_id: reply_to.unwrap_or(root).clone(),
            }),
            is_falling_back: Some(reply_to.is_none()),
        });
        self
    }

    pub fn with_source_event(mut self, source: &EventId) -> Self {
        self.set_source_event(source);
        self
    }

    pub fn set_source_event(&mut self, source: &EventId) {
        self.extra.insert(
            meta::SOURCE_EVENT.to_string(),
            Value::String(source.to_string()),
        );
    }

    pub fn source_event(&self) -> Option<EventId> {
        self.extra
            .get(meta::SOURCE_EVENT)
            .and_then(Value::as_str)
            .map(EventId::from)
    }

    pub fn is_notice(&self) -> bool {
        self.msgtype == msgtype::NOTICE
    }

    /// Text-like messages get an attribution prefix; media is forwarded as-is
    pub fn is_text_like(&self) -> bool {
        self.msgtype == msgtype::TEXT || self.msgtype == msgtype::EMOTE
    }

    pub fn thread_root(&self) -> Option<&EventId> {
        self.relates_to
            .as_ref()
            .filter(|rel| rel.rel_type.as_deref() == Some(rel_type::THREAD))
            .and_then(|rel| rel.event_id.as_ref())
    }

    /// The event this content replaces, if it is an edit
    pub fn replaces(&self) -> Option<&EventId> {
        self.relates_to
            .as_ref()
            .filter(|rel| rel.rel_type.as_deref() == Some(rel_type::REPLACE))
            .and_then(|rel| rel.event_id.as_ref())
    }

    /// Media location for file-like messages
    pub fn media_url(&self) -> Option<&str> {
        self.extra.get("url").and_then(Value::as_str)
    }

    /// Build an edit of `target` whose visible content becomes `self`
    pub fn into_edit_of(self, target: &EventId) -> MessageContent {
        let mut replacement = self.clone();
        replacement.relates_to = None;
        MessageContent {
            msgtype: self.msgtype,
            body: format!("* {}", self.body),
            format: self.format,
            formatted_body: self.formatted_body.map(|html| format!("* {html}")),
            relates_to: Some(RelatesTo {
                rel_type: Some(rel_type::REPLACE.to_string()),
                event_id: Some(target.clone()),
                ..Default::default()
            }),
            new_content: Some(Box::new(replacement)),
            extra: self.extra,
        }
    }
}

/// The `m.relates_to` block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatesTo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(
        rename = "m.in_reply_to",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub in_reply_to: Option<InReplyTo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_falling_back: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InReplyTo {
    pub event_id: EventId,
}

/// Content of an `m.reaction` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionContent {
    #[serde(rename = "m.relates_to")]
    pub relates_to: RelatesTo,
}

impl ReactionContent {
    pub fn new(target: &EventId, key: impl Into<String>) -> Self {
        Self {
            relates_to: RelatesTo {
                rel_type: Some(rel_type::ANNOTATION.to_string()),
                event_id: Some(target.clone()),
                key: Some(key.into()),
                ..Default::default()
            },
        }
    }

    pub fn target(&self) -> Option<&EventId> {
        self.relates_to.event_id.as_ref()
    }

    pub fn key(&self) -> Option<&str> {
        self.relates_to.key.as_deref()
    }
}

/// Content of an `m.room.member` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberContent {
    pub membership: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
}

impl MemberContent {
    pub fn is_invite(&self) -> bool {
        self.membership == "invite"
    }

    pub fn is_leave(&self) -> bool {
        self.membership == "leave" || self.membership == "ban"
    }
}

// =============================================================================
// Listings and profiles
// =============================================================================

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub chunk: Vec<T>,
    /// Continuation token; `None` once the listing is exhausted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn last(chunk: Vec<T>) -> Self {
        Self { chunk, next: None }
    }
}

/// Public profile of a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}
