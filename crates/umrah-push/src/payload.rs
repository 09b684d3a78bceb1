//! Turning a push payload into an OS notification.

use serde::{Deserialize, Serialize};
use tracing::warn;

use umrah_shared::constants::DEFAULT_NOTIFICATION_TAG;
use umrah_shared::protocol::PushPayload;
use umrah_shared::types::ActorRole;

use crate::config::WorkerConfig;

/// Buttons offered on a chat notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    View,
    Close,
}

impl NotificationAction {
    pub fn id(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Close => "close",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::View => "عرض",
            Self::Close => "إغلاق",
        }
    }

    /// Action id reported by the platform; an empty id is a body click.
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "view" => Some(Self::View),
            "close" => Some(Self::Close),
            _ => None,
        }
    }
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedNotification {
    pub title: String,
    pub body: String,
    pub icon: String,
    /// Notifications sharing a tag replace each other.
    pub tag: String,
    /// Where a click navigates.
    pub url: String,
    pub conversation_id: Option<String>,
    pub actions: Vec<NotificationAction>,
}

/// Decode raw push bytes. Missing or malformed data yields an empty
/// payload so a generic notification is still shown.
pub fn parse_push(data: Option<&[u8]>) -> PushPayload {
    match data {
        None => PushPayload::default(),
        Some(bytes) if bytes.is_empty() => PushPayload::default(),
        Some(bytes) => PushPayload::from_bytes(bytes).unwrap_or_else(|e| {
            warn!(error = %e, "Malformed push payload, showing generic notification");
            PushPayload::default()
        }),
    }
}

/// Apply the fallbacks and build the notification for `payload`.
pub fn render(payload: &PushPayload, config: &WorkerConfig) -> RenderedNotification {
    let notification = payload.notification.clone().unwrap_or_default();
    let data = payload.data.clone().unwrap_or_default();

    let conversation_id = non_empty(data.chat_id);
    let locale = non_empty(data.locale).unwrap_or_else(|| config.default_locale.clone());
    let role = non_empty(data.user_type)
        .and_then(|role| role.parse::<ActorRole>().ok())
        .map(|role| role.route_segment().to_string())
        .unwrap_or_else(|| config.default_role.clone());

    RenderedNotification {
        title: non_empty(notification.title).unwrap_or_else(|| config.generic_title.clone()),
        body: non_empty(notification.body).unwrap_or_else(|| config.generic_body.clone()),
        icon: non_empty(notification.icon).unwrap_or_else(|| config.icon.clone()),
        tag: conversation_id
            .clone()
            .unwrap_or_else(|| DEFAULT_NOTIFICATION_TAG.to_string()),
        url: chat_url(&locale, &role, conversation_id.as_deref()),
        conversation_id,
        actions: vec![NotificationAction::View, NotificationAction::Close],
    }
}

/// `/{locale}/{role}/chat?id={conversation}`
pub fn chat_url(locale: &str, role: &str, conversation: Option<&str>) -> String {
    match conversation {
        Some(id) => format!("/{locale}/{role}/chat?id={id}"),
        None => format!("/{locale}/{role}/chat"),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_only_push_uses_generic_copy() {
        let payload = parse_push(Some(
            br#"{"data":{"chat_id":"42","user_type":"office","locale":"ar"}}"#,
        ));
        let rendered = render(&payload, &WorkerConfig::default());

        assert_eq!(rendered.title, "رسالة جديدة");
        assert_eq!(rendered.body, "لديك رسالة جديدة");
        assert_eq!(rendered.tag, "42");
        assert_eq!(rendered.url, "/ar/office/chat?id=42");
        assert_eq!(
            rendered.actions,
            vec![NotificationAction::View, NotificationAction::Close]
        );
    }

    #[test]
    fn test_notification_block_wins() {
        let payload = parse_push(Some(
            br#"{"notification":{"title":"Omar","body":"Salam","icon":"/a.png"},
                 "data":{"chat_id":7,"user_type":"pilgrim","locale":"en"}}"#,
        ));
        let rendered = render(&payload, &WorkerConfig::default());

        assert_eq!(rendered.title, "Omar");
        assert_eq!(rendered.body, "Salam");
        assert_eq!(rendered.icon, "/a.png");
        assert_eq!(rendered.url, "/en/user/chat?id=7");
    }

    #[test]
    fn test_empty_or_broken_payload_falls_back() {
        for data in [None, Some(&b""[..]), Some(&b"not json"[..])] {
            let rendered = render(&parse_push(data), &WorkerConfig::default());
            assert_eq!(rendered.tag, "default");
            assert_eq!(rendered.url, "/ar/user/chat");
            assert_eq!(rendered.icon, "/icons/icon-192x192.png");
        }
    }

    #[test]
    fn test_unknown_role_uses_default_segment() {
        let payload = parse_push(Some(br#"{"data":{"chat_id":"3","user_type":"guest"}}"#));
        assert_eq!(render(&payload, &WorkerConfig::default()).url, "/ar/user/chat?id=3");
    }

    #[test]
    fn test_action_ids() {
        assert_eq!(NotificationAction::from_id("view"), Some(NotificationAction::View));
        assert_eq!(NotificationAction::from_id(""), None);
        assert_eq!(NotificationAction::Close.id(), "close");
    }
}
