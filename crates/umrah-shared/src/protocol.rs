use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::constants::*;
use crate::error::ProtocolError;
use crate::models::{
    ChatMessage, ChatNotification, MessageStatusUpdate, PresenceUpdate, StatusUpdate,
    TypingSignal,
};
use crate::types::{ActorId, ConversationId};

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// The realtime channels the chat core subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// The actor's private channel (presence and status events).
    User(ActorId),
    /// The actor's notification channel.
    Notifications(ActorId),
    /// One conversation's channel.
    Conversation(ConversationId),
}

impl ChannelKind {
    pub fn name(&self) -> String {
        match self {
            Self::User(id) => format!("{CHANNEL_USER_PREFIX}{id}"),
            Self::Notifications(id) => format!("{CHANNEL_NOTIFICATIONS_PREFIX}{id}"),
            Self::Conversation(id) => format!("{CHANNEL_CHAT_PREFIX}{id}"),
        }
    }

    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        if let Some(rest) = name.strip_prefix(CHANNEL_USER_PREFIX) {
            return Ok(Self::User(rest.parse()?));
        }
        if let Some(rest) = name.strip_prefix(CHANNEL_NOTIFICATIONS_PREFIX) {
            return Ok(Self::Notifications(rest.parse()?));
        }
        if let Some(rest) = name.strip_prefix(CHANNEL_CHAT_PREFIX) {
            return Ok(Self::Conversation(rest.parse()?));
        }
        Err(ProtocolError::UnknownChannel(name.to_string()))
    }

    /// Implicit channels are subscribed on connect and live until disconnect.
    pub fn is_implicit(&self) -> bool {
        !matches!(self, Self::Conversation(_))
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A decoded realtime event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    Message(ChatMessage),
    Typing(TypingSignal),
    Notification(ChatNotification),
    Status(StatusUpdate),
}

#[derive(Deserialize)]
struct TypingWire {
    conversation_id: ConversationId,
    user_id: ActorId,
    #[serde(default, alias = "user_name", alias = "name")]
    user_display_name: Option<String>,
    #[serde(alias = "typing")]
    is_typing: bool,
}

impl RealtimeEvent {
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::Message(m) => Some(m.conversation_id),
            Self::Typing(t) => Some(t.conversation_id),
            Self::Notification(n) => Some(n.conversation_id),
            Self::Status(StatusUpdate::Message(s)) => Some(s.conversation_id),
            Self::Status(StatusUpdate::Presence(_)) => None,
        }
    }

    /// Decode a broadcast event received on `channel`.
    ///
    /// Returns `Ok(None)` for events the chat core does not consume.
    pub fn decode(
        channel: &ChannelKind,
        event: &str,
        data: &str,
    ) -> Result<Option<Self>, ProtocolError> {
        let event = normalize_event_name(event);
        let raw: Value = serde_json::from_str(data)?;

        let decoded = match event {
            EVENT_MESSAGE_SENT => {
                let value = with_conversation(unwrap_envelope(raw, "message"), channel);
                Self::Message(serde_json::from_value(value)?)
            }
            EVENT_USER_TYPING => {
                let wire: TypingWire = serde_json::from_value(with_conversation(raw, channel))?;
                Self::Typing(TypingSignal {
                    conversation_id: wire.conversation_id,
                    user_id: wire.user_id,
                    user_display_name: wire.user_display_name.unwrap_or_default(),
                    is_typing: wire.is_typing,
                    observed_at: Utc::now(),
                })
            }
            EVENT_NEW_NOTIFICATION => {
                let mut notification: ChatNotification =
                    serde_json::from_value(unwrap_envelope(raw, "notification"))?;
                notification.message_preview =
                    truncate_preview(&notification.message_preview, MAX_PREVIEW_CHARS);
                Self::Notification(notification)
            }
            EVENT_MESSAGE_STATUS => {
                let update: MessageStatusUpdate =
                    serde_json::from_value(with_conversation(raw, channel))?;
                Self::Status(StatusUpdate::Message(update))
            }
            EVENT_USER_STATUS => {
                let update: PresenceUpdate = serde_json::from_value(raw)?;
                Self::Status(StatusUpdate::Presence(update))
            }
            _ => return Ok(None),
        };

        Ok(Some(decoded))
    }
}

/// Broadcasters prefix custom event names with a `.`.
pub fn normalize_event_name(event: &str) -> &str {
    event.strip_prefix('.').unwrap_or(event)
}

/// Payloads are either the bare object or wrapped as `{ "<key>": {...} }`.
fn unwrap_envelope(raw: Value, key: &str) -> Value {
    match raw {
        Value::Object(mut map) if map.get(key).map_or(false, Value::is_object) => {
            map.remove(key).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Fill in the conversation id from the channel when the payload omits it.
fn with_conversation(raw: Value, channel: &ChannelKind) -> Value {
    match (raw, channel) {
        (Value::Object(mut map), ChannelKind::Conversation(id))
            if !map.contains_key("conversation_id") && !map.contains_key("chat_id") =>
        {
            map.insert("conversation_id".into(), Value::from(id.0));
            Value::Object(map)
        }
        (other, _) => other,
    }
}

pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

// ---------------------------------------------------------------------------
// Push payload
// ---------------------------------------------------------------------------

/// Payload of a backend-issued push message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub notification: Option<PushNotificationBlock>,
    #[serde(default)]
    pub data: Option<PushDataBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotificationBlock {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushDataBlock {
    #[serde(default, deserialize_with = "lenient_string")]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl PushPayload {
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageStatus;
    use crate::types::{MessageId, NotificationId};

    #[test]
    fn test_channel_names_roundtrip() {
        let kinds = [
            ChannelKind::User(ActorId(5)),
            ChannelKind::Notifications(ActorId(5)),
            ChannelKind::Conversation(ConversationId(42)),
        ];
        for kind in kinds {
            assert_eq!(ChannelKind::parse(&kind.name()).unwrap(), kind);
        }
        assert_eq!(
            ChannelKind::Conversation(ConversationId(42)).name(),
            "private-chat.42"
        );
        assert!(ChannelKind::parse("presence-lobby").is_err());
    }

    #[test]
    fn test_decode_message_envelope() {
        let channel = ChannelKind::Conversation(ConversationId(42));
        let data = r#"{"message":{"id":3,"sender_id":9,"sender_name":"Omar","message":"Salam","created_at":"2026-03-01T10:00:00Z"}}"#;
        let event = RealtimeEvent::decode(&channel, ".message.sent", data)
            .unwrap()
            .unwrap();
        match event {
            RealtimeEvent::Message(m) => {
                assert_eq!(m.id, MessageId::Remote(3));
                assert_eq!(m.conversation_id, ConversationId(42));
                assert_eq!(m.body, "Salam");
                assert_eq!(m.sender_display_name, "Omar");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_typing_uses_channel_conversation() {
        let channel = ChannelKind::Conversation(ConversationId(7));
        let data = r#"{"user_id":9,"user_name":"Omar","is_typing":true}"#;
        let event = RealtimeEvent::decode(&channel, "user.typing", data)
            .unwrap()
            .unwrap();
        assert_eq!(event.conversation_id(), Some(ConversationId(7)));
    }

    #[test]
    fn test_decode_notification_and_status() {
        let channel = ChannelKind::Notifications(ActorId(1));
        let data = r#"{"id":7,"chat_id":"42","sender_id":9,"sender_name":"Office","message":"Your bus leaves at 6"}"#;
        let event = RealtimeEvent::decode(&channel, "new-notification", data)
            .unwrap()
            .unwrap();
        match event {
            RealtimeEvent::Notification(n) => {
                assert_eq!(n.id, NotificationId::from(7));
                assert!(!n.is_read);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let chat = ChannelKind::Conversation(ConversationId(42));
        let data = r#"{"message_id":3,"status":"read"}"#;
        let event = RealtimeEvent::decode(&chat, "message.status", data)
            .unwrap()
            .unwrap();
        match event {
            RealtimeEvent::Status(StatusUpdate::Message(s)) => {
                assert_eq!(s.status, MessageStatus::Read);
                assert_eq!(s.conversation_id, ConversationId(42));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_and_malformed() {
        let channel = ChannelKind::User(ActorId(1));
        assert!(RealtimeEvent::decode(&channel, "booking.updated", "{}")
            .unwrap()
            .is_none());
        assert!(RealtimeEvent::decode(&channel, "message.sent", "not json").is_err());
    }

    #[test]
    fn test_push_payload_lenient_chat_id() {
        let payload =
            PushPayload::from_bytes(br#"{"data":{"chat_id":42,"user_type":"office"}}"#).unwrap();
        let data = payload.data.unwrap();
        assert_eq!(data.chat_id.as_deref(), Some("42"));
        assert!(payload.notification.is_none());
    }

    #[test]
    fn test_truncate_preview() {
        assert_eq!(truncate_preview("abc", 5), "abc");
        assert_eq!(truncate_preview("abcdef", 3), "abc…");
    }
}
