//! Transport contract between the realtime adapter and a pub/sub backend.
//!
//! A transport runs its connection in a dedicated tokio task. The adapter
//! talks to it through a typed command channel and receives notifications
//! on a second channel, so the adapter never touches the socket directly.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ApiError, TransportError};

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Subscribe to a channel (private channels are authorized first).
    Subscribe(String),
    /// Leave a channel.
    Unsubscribe(String),
    /// Close the connection and end the task.
    Shutdown,
}

/// Notifications sent *from* the transport task to the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportNotification {
    /// The server confirmed a subscription.
    Subscribed { channel: String },
    /// Authorization or the server rejected a subscription.
    SubscriptionFailed { channel: String, reason: String },
    /// A broadcast event on a subscribed channel. `data` is raw JSON.
    Event {
        channel: String,
        event: String,
        data: String,
    },
    /// A recoverable protocol or socket error.
    Error { message: String },
    /// The connection is gone; no further notifications follow.
    Closed,
}

/// Channels handed back by [`Transport::open`].
#[derive(Debug)]
pub struct TransportHandle {
    /// Connection id assigned by the server.
    pub socket_id: String,
    pub commands: mpsc::Sender<TransportCommand>,
    pub notifications: mpsc::Receiver<TransportNotification>,
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Signs private-channel subscriptions for a given connection.
#[async_trait]
pub trait ChannelAuthorizer: Send + Sync {
    async fn authorize(&self, socket_id: &str, channel: &str) -> Result<String, ApiError>;
}

/// A pub/sub connection factory.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection and spawn its event loop. Returns once the
    /// server handshake has completed.
    async fn open(
        &self,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Result<TransportHandle, TransportError>;
}
