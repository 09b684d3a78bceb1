//! In-process transport.
//!
//! Honours the same command/notification contract as the WebSocket
//! transport. A [`MemoryHub`] plays the server: it records subscriptions,
//! injects broadcast events and can simulate dropped connections.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{
    ChannelAuthorizer, Transport, TransportCommand, TransportHandle, TransportNotification,
};

#[derive(Default)]
struct HubState {
    subscriptions: Vec<String>,
    subscribe_log: Vec<String>,
    opened: usize,
    fail_opens: usize,
    connection: u64,
    notify: Option<mpsc::Sender<TransportNotification>>,
}

/// Server side of a [`MemoryTransport`].
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Channels currently subscribed on the live connection.
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    /// Every subscribe request seen, across connections.
    pub fn subscribe_log(&self) -> Vec<String> {
        self.lock().subscribe_log.clone()
    }

    /// Number of successfully opened connections.
    pub fn open_count(&self) -> usize {
        self.lock().opened
    }

    pub fn is_connected(&self) -> bool {
        self.lock().notify.is_some()
    }

    /// Make the next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.lock().fail_opens = n;
    }

    /// Broadcast an event. Returns `false` when nobody is subscribed.
    pub async fn publish(&self, channel: &str, event: &str, data: &str) -> bool {
        let notify = {
            let state = self.lock();
            if !state.subscriptions.iter().any(|c| c == channel) {
                return false;
            }
            state.notify.clone()
        };
        match notify {
            Some(tx) => tx
                .send(TransportNotification::Event {
                    channel: channel.to_string(),
                    event: event.to_string(),
                    data: data.to_string(),
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Simulate the server dropping the connection.
    pub async fn drop_connection(&self) {
        let notify = {
            let mut state = self.lock();
            state.subscriptions.clear();
            state.notify.take()
        };
        if let Some(tx) = notify {
            let _ = tx.send(TransportNotification::Closed).await;
        }
    }
}

/// Transport whose server is an in-process [`MemoryHub`].
#[derive(Clone, Default)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryHub) {
        let hub = MemoryHub::default();
        (Self { hub: hub.clone() }, hub)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Result<TransportHandle, TransportError> {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<TransportCommand>(64);
        let (notif_tx, notif_rx) = mpsc::channel::<TransportNotification>(256);

        let connection = {
            let mut state = self.hub.lock();
            if state.fail_opens > 0 {
                state.fail_opens -= 1;
                return Err(TransportError::Handshake("memory hub refused".into()));
            }
            state.opened += 1;
            state.connection += 1;
            state.subscriptions.clear();
            state.notify = Some(notif_tx.clone());
            state.connection
        };
        let socket_id = format!("memory.{connection}");

        let hub = self.hub.clone();
        let task_socket_id = socket_id.clone();
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    TransportCommand::Subscribe(channel) => {
                        if let Err(e) = authorizer.authorize(&task_socket_id, &channel).await {
                            let _ = notif_tx
                                .send(TransportNotification::SubscriptionFailed {
                                    channel,
                                    reason: e.to_string(),
                                })
                                .await;
                            continue;
                        }
                        {
                            let mut state = hub.lock();
                            if state.connection != connection {
                                break;
                            }
                            state.subscribe_log.push(channel.clone());
                            if !state.subscriptions.contains(&channel) {
                                state.subscriptions.push(channel.clone());
                            }
                        }
                        let _ = notif_tx
                            .send(TransportNotification::Subscribed { channel })
                            .await;
                    }
                    TransportCommand::Unsubscribe(channel) => {
                        let mut state = hub.lock();
                        if state.connection == connection {
                            state.subscriptions.retain(|c| c != &channel);
                        }
                    }
                    TransportCommand::Shutdown => break,
                }
            }

            let mut state = hub.lock();
            if state.connection == connection {
                state.subscriptions.clear();
                state.notify = None;
            }
            debug!(connection, "Memory transport task ended");
        });

        Ok(TransportHandle {
            socket_id,
            commands: cmd_tx,
            notifications: notif_rx,
        })
    }
}
