//! Domain model of the chat core.
//!
//! Field aliases accept the snake_case shapes the REST backend and the
//! broadcaster emit, so the same structs serve both paths.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{ActorId, ActorRole, ConversationId, MessageId, NotificationId};

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The currently authenticated actor.
#[derive(Clone, PartialEq, Eq)]
pub struct ActorIdentity {
    pub id: ActorId,
    pub display_name: String,
    pub role: ActorRole,
    /// Bearer token presented to the backend and the channel authorizer.
    pub token: String,
    pub token_expiry: DateTime<Utc>,
}

impl ActorIdentity {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.token_expiry
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for ActorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorIdentity")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("role", &self.role)
            .field("token", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    #[default]
    Private,
    Group,
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub id: ActorId,
    pub role: ActorRole,
    #[serde(default, alias = "name", deserialize_with = "null_as_default")]
    pub display_name: String,
}

/// A persistent thread between a fixed set of participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: ConversationId,
    #[serde(default, alias = "type")]
    pub kind: RoomKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub participants: BTreeSet<ParticipantRef>,
    #[serde(default)]
    pub last_message: Option<ChatMessage>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unread_count: u32,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Image,
    #[serde(alias = "file")]
    Document,
    System,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    #[default]
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Sending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Read | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Statuses only advance; `failed` is reachable from `sending` alone.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => *self == Self::Sending,
            _ => next.rank() > self.rank(),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(alias = "chat_id")]
    pub conversation_id: ConversationId,
    pub sender_id: ActorId,
    #[serde(default, alias = "sender_name", deserialize_with = "null_as_default")]
    pub sender_display_name: String,
    #[serde(default, alias = "message", alias = "content", deserialize_with = "null_as_default")]
    pub body: String,
    #[serde(default, alias = "type", alias = "message_type")]
    pub content_type: ContentType,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(alias = "created_at")]
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Total order within a conversation: `sent_at`, then `id`.
    pub fn ordering_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.sent_at, self.id)
    }
}

// ---------------------------------------------------------------------------
// Typing / status
// ---------------------------------------------------------------------------

/// Ephemeral "user is typing" signal; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub conversation_id: ConversationId,
    pub user_id: ActorId,
    pub user_display_name: String,
    pub is_typing: bool,
    pub observed_at: DateTime<Utc>,
}

/// Delivery/read receipt for a message, sent by another participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatusUpdate {
    #[serde(alias = "chat_id")]
    pub conversation_id: ConversationId,
    pub message_id: u64,
    pub status: MessageStatus,
    #[serde(default, alias = "by")]
    pub user_id: Option<ActorId>,
    #[serde(default = "Utc::now", alias = "updated_at")]
    pub at: DateTime<Utc>,
}

/// Online/offline presence of another actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub user_id: ActorId,
    #[serde(alias = "is_online")]
    pub online: bool,
    #[serde(default = "Utc::now", alias = "last_seen")]
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusUpdate {
    Message(MessageStatusUpdate),
    Presence(PresenceUpdate),
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// An entry in the process-wide notification list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatNotification {
    pub id: NotificationId,
    #[serde(alias = "chat_id")]
    pub conversation_id: ConversationId,
    pub sender_id: ActorId,
    #[serde(default, alias = "sender_name", deserialize_with = "null_as_default")]
    pub sender_display_name: String,
    #[serde(default, alias = "message", alias = "body", deserialize_with = "null_as_default")]
    pub message_preview: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "read")]
    pub is_read: bool,
}
