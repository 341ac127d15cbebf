//! Event types emitted by the client.
//!
//! Lifecycle events are raised while logging in; contact and message events
//! come from the sync loop.

use serde::{Deserialize, Serialize};

use crate::types::Contact;

/// Discriminant used to register a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UuidGenerated,
    ScanPending,
    AuthConfirmed,
    LoggedIn,
    SessionInitialized,
    ContactsInitialized,
    ListenFailed,
    ContactsModified,
    ContactsDeleted,
    MessageReceived,
}

/// Plain message classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Text,
    Image,
    Voice,
    Video,
    ContactCard,
    Location,
    FriendRequest,
}

/// Location data extracted from a location share.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub x: String,
    pub y: String,
    pub label: String,
    /// Absolute URL of the map preview, when one was embedded.
    pub image_url: String,
}

/// Friend-request payload (`RecommendInfo` on the wire).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RecommendInfo {
    pub user_name: String,
    pub nick_name: String,
    pub content: String,
    pub ticket: String,
    pub scene: i64,
    pub sex: i64,
    pub province: String,
    pub city: String,
}

/// Message kind with the data that only that kind carries.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text,
    Image { media_url: String },
    Voice { media_url: String },
    Video { media_url: String },
    ContactCard,
    Location(LocationInfo),
    FriendRequest(RecommendInfo),
}

impl MessageKind {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageKind::Text => MessageType::Text,
            MessageKind::Image { .. } => MessageType::Image,
            MessageKind::Voice { .. } => MessageType::Voice,
            MessageKind::Video { .. } => MessageType::Video,
            MessageKind::ContactCard => MessageType::ContactCard,
            MessageKind::Location(_) => MessageType::Location,
            MessageKind::FriendRequest(_) => MessageType::FriendRequest,
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        match self {
            MessageKind::Image { media_url }
            | MessageKind::Voice { media_url }
            | MessageKind::Video { media_url } => Some(media_url),
            _ => None,
        }
    }
}

/// Resolved identity of whoever wrote the message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderInfo {
    pub user_name: String,
    pub nick_name: String,
    /// Contact remark for 1:1 chats, group display name for group chats.
    pub remark_name: String,
}

/// A normalized inbound message.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub msg_id: String,
    pub kind: MessageKind,
    pub is_group: bool,
    pub is_self_sent: bool,
    pub mentions_me: bool,
    /// Text content; for group messages the sender prefix is stripped.
    pub content: String,
    pub from_user_name: String,
    pub to_user_name: String,
    pub from_contact: Option<Contact>,
    pub to_contact: Option<Contact>,
    pub sender: SenderInfo,
    pub sender_short_id: String,
    pub timestamp: i64,
    /// The record exactly as received.
    pub raw: serde_json::Value,
}

impl MessageEvent {
    pub fn message_type(&self) -> MessageType {
        self.kind.message_type()
    }

    /// Id to reply to: the group for group messages, the other party otherwise.
    pub fn reply_target(&self) -> &str {
        if self.is_group {
            if crate::types::is_group_id(&self.from_user_name) {
                &self.from_user_name
            } else {
                &self.to_user_name
            }
        } else if self.is_self_sent {
            &self.to_user_name
        } else {
            &self.from_user_name
        }
    }
}

/// A login ticket was issued; the QR code encodes it.
#[derive(Debug, Clone)]
pub struct UuidGenerated {
    pub uuid: String,
}

/// The QR code was scanned but not yet confirmed on the phone.
#[derive(Debug, Clone)]
pub struct ScanPending {
    pub avatar: String,
}

/// Login was confirmed on the phone.
#[derive(Debug, Clone)]
pub struct AuthConfirmed {
    pub redirect_url: String,
}

#[derive(Debug, Clone)]
pub struct LoggedIn {
    pub device_id: String,
}

#[derive(Debug, Clone)]
pub struct SessionInitialized {
    pub me: Contact,
}

#[derive(Debug, Clone)]
pub struct ContactsInitialized {
    pub count: usize,
}

/// A sync-check cycle failed.
#[derive(Debug, Clone)]
pub struct ListenFailed {
    pub consecutive_failures: u32,
    pub host: String,
}

/// All possible events.
#[derive(Debug, Clone)]
pub enum Event {
    UuidGenerated(UuidGenerated),
    ScanPending(ScanPending),
    AuthConfirmed(AuthConfirmed),
    LoggedIn(LoggedIn),
    SessionInitialized(SessionInitialized),
    ContactsInitialized(ContactsInitialized),
    ListenFailed(ListenFailed),
    ContactsModified(Vec<String>),
    ContactsDeleted(Vec<String>),
    MessageReceived(Box<MessageEvent>),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::UuidGenerated(_) => EventKind::UuidGenerated,
            Event::ScanPending(_) => EventKind::ScanPending,
            Event::AuthConfirmed(_) => EventKind::AuthConfirmed,
            Event::LoggedIn(_) => EventKind::LoggedIn,
            Event::SessionInitialized(_) => EventKind::SessionInitialized,
            Event::ContactsInitialized(_) => EventKind::ContactsInitialized,
            Event::ListenFailed(_) => EventKind::ListenFailed,
            Event::ContactsModified(_) => EventKind::ContactsModified,
            Event::ContactsDeleted(_) => EventKind::ContactsDeleted,
            Event::MessageReceived(_) => EventKind::MessageReceived,
        }
    }
}
