/// Application name
pub const APP_NAME: &str = "Umrah";

/// A typing signal with `is_typing = true` expires after this many
/// milliseconds without a refresh.
pub const TYPING_EXPIRY_MS: u64 = 3_000;

/// Interval of the chat session liveness check, in seconds.
pub const LIVENESS_INTERVAL_SECS: u64 = 30;

/// Default unread-count fallback poll interval, in seconds.
pub const UNREAD_POLL_SECS: u64 = 60;

/// First reconnect backoff step, in milliseconds.
pub const RECONNECT_BACKOFF_BASE_MS: u64 = 1_000;

/// Upper bound of the reconnect backoff, in seconds.
pub const RECONNECT_BACKOFF_MAX_SECS: u64 = 30;

/// Reconnect attempts per liveness tick before waiting for the next tick.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Pusher wire protocol version sent in the connection URL.
pub const PUSHER_PROTOCOL_VERSION: u8 = 7;

/// Pusher keepalive ping interval, in seconds.
pub const PUSHER_PING_SECS: u64 = 120;

/// Realtime event names broadcast by the backend
pub const EVENT_MESSAGE_SENT: &str = "message.sent";
pub const EVENT_USER_TYPING: &str = "user.typing";
pub const EVENT_NEW_NOTIFICATION: &str = "new-notification";
pub const EVENT_MESSAGE_STATUS: &str = "message.status";
pub const EVENT_USER_STATUS: &str = "user.status";

/// Channel name prefixes (private channels need backend authorization)
pub const CHANNEL_USER_PREFIX: &str = "private-user.";
pub const CHANNEL_NOTIFICATIONS_PREFIX: &str = "private-notifications.";
pub const CHANNEL_CHAT_PREFIX: &str = "private-chat.";

/// Tag used for push notifications that carry no conversation id.
pub const DEFAULT_NOTIFICATION_TAG: &str = "default";

/// Generic push notification copy used when the payload omits it.
pub const GENERIC_NOTIFICATION_TITLE: &str = "رسالة جديدة";
pub const GENERIC_NOTIFICATION_BODY: &str = "لديك رسالة جديدة";

/// Fallbacks for the click-through route of a push notification.
pub const DEFAULT_LOCALE: &str = "ar";
pub const DEFAULT_ROUTE_ROLE: &str = "user";

/// Default icon shown on OS notifications.
pub const DEFAULT_NOTIFICATION_ICON: &str = "/icons/icon-192x192.png";

/// Versioned name of the push worker's offline cache.
pub const CACHE_NAME: &str = "umrah-cache-v1";

/// Maximum characters kept in a notification message preview.
pub const MAX_PREVIEW_CHARS: usize = 120;
