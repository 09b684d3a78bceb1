use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Backend ids arrive as JSON numbers from REST and as strings from push
/// payloads; both forms are accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|_| ProtocolError::InvalidId(s.to_string()))
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                match RawId::deserialize(deserializer)? {
                    RawId::Number(n) => Ok(Self(n)),
                    RawId::Text(s) => s.parse().map_err(serde::de::Error::custom),
                }
            }
        }
    };
}

numeric_id!(
    /// Backend id of a user (pilgrim, office staff, bus operator or admin).
    ActorId
);

numeric_id!(
    /// Backend id of a conversation. The client never synthesizes one.
    ConversationId
);

/// Backend id of a stored notification (numeric or UUID depending on the
/// notification table, so it is kept opaque).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for NotificationId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for NotificationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Self(n.to_string()),
            RawId::Text(s) => Self(s),
        })
    }
}

/// Message identity: backend-assigned once acknowledged, client-generated
/// while the message is still `sending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Remote(u64),
    Local(Uuid),
}

impl MessageId {
    /// Fresh client-side id for an optimistic message.
    pub fn local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(id) => write!(f, "{id}"),
            Self::Local(id) => write!(f, "local:{id}"),
        }
    }
}

/// Role of an actor on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    #[serde(alias = "user")]
    Pilgrim,
    Office,
    #[serde(alias = "bus")]
    BusOperator,
    Admin,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pilgrim => "pilgrim",
            Self::Office => "office",
            Self::BusOperator => "bus_operator",
            Self::Admin => "admin",
        }
    }

    /// Path segment of the role's dashboard in application URLs
    /// (`/{locale}/{segment}/chat`).
    pub fn route_segment(&self) -> &'static str {
        match self {
            Self::Pilgrim => "user",
            Self::Office => "office",
            Self::BusOperator => "bus",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorRole {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pilgrim" | "user" => Ok(Self::Pilgrim),
            "office" => Ok(Self::Office),
            "bus_operator" | "bus-operator" | "bus" => Ok(Self::BusOperator),
            "admin" => Ok(Self::Admin),
            other => Err(ProtocolError::UnknownRole(other.to_string())),
        }
    }
}

/// State of the process-wide realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    NoAuth,
    NoUser,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// States the liveness check should try to recover from.
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::NoAuth => "no-auth",
            Self::NoUser => "no-user",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_accept_numbers_and_strings() {
        let a: ConversationId = serde_json::from_str("42").unwrap();
        let b: ConversationId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(a, b);
        assert!(serde_json::from_str::<ConversationId>("\"abc\"").is_err());

        let n: NotificationId = serde_json::from_str("7").unwrap();
        assert_eq!(n, NotificationId::from(7));
    }

    #[test]
    fn test_message_id_untagged() {
        let remote: MessageId = serde_json::from_str("15").unwrap();
        assert_eq!(remote, MessageId::Remote(15));

        let local = MessageId::local();
        let json = serde_json::to_string(&local).unwrap();
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(local, back);
        assert!(back.is_local());
    }

    #[test]
    fn test_role_aliases() {
        let r: ActorRole = serde_json::from_str("\"bus\"").unwrap();
        assert_eq!(r, ActorRole::BusOperator);
        assert_eq!("user".parse::<ActorRole>().unwrap(), ActorRole::Pilgrim);
        assert_eq!(ActorRole::Office.route_segment(), "office");
        assert!("guide".parse::<ActorRole>().is_err());
    }
}
