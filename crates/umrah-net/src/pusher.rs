//! Pusher-protocol transport over a WebSocket.
//!
//! Speaks protocol version 7: waits for `pusher:connection_established`,
//! authorizes `private-*` channels through the backend before sending
//! `pusher:subscribe`, and answers keepalive pings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use umrah_shared::constants::{PUSHER_PING_SECS, PUSHER_PROTOCOL_VERSION};

use crate::error::TransportError;
use crate::transport::{
    ChannelAuthorizer, Transport, TransportCommand, TransportHandle, TransportNotification,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection settings for a Pusher-compatible server.
#[derive(Debug, Clone)]
pub struct PusherConfig {
    /// Application key. Env: `UMRAH_PUSHER_APP_KEY`
    pub app_key: String,
    /// Cluster identifier, e.g. `eu`. Env: `UMRAH_PUSHER_CLUSTER`
    pub cluster: String,
    /// Host override for self-hosted servers (soketi, reverb).
    pub host: Option<String>,
    pub use_tls: bool,
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
}

impl PusherConfig {
    pub fn new(app_key: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            cluster: cluster.into(),
            host: None,
            use_tls: true,
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(PUSHER_PING_SECS),
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let host = self
            .host
            .clone()
            .unwrap_or_else(|| format!("ws-{}.pusher.com", self.cluster));
        format!(
            "{scheme}://{host}/app/{}?protocol={}&client=umrah-rust&version={}",
            self.app_key,
            PUSHER_PROTOCOL_VERSION,
            env!("CARGO_PKG_VERSION")
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Frame {
    /// Pusher double-encodes `data` as a JSON string; servers in the wild
    /// also send plain objects.
    fn data_string(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            Value::Null => "{}".to_string(),
            other => other.to_string(),
        }
    }
}

/// What the event loop should do with an incoming text frame.
#[derive(Debug, PartialEq, Eq)]
enum Incoming {
    Ping,
    Notify(TransportNotification),
    Ignore,
}

fn classify(text: &str) -> Incoming {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "Dropping malformed frame");
            return Incoming::Ignore;
        }
    };

    match frame.event.as_str() {
        "pusher:ping" => Incoming::Ping,
        "pusher_internal:subscription_succeeded" => match frame.channel {
            Some(channel) => Incoming::Notify(TransportNotification::Subscribed { channel }),
            None => Incoming::Ignore,
        },
        "pusher:subscription_error" => {
            let reason = frame.data_string();
            Incoming::Notify(TransportNotification::SubscriptionFailed {
                channel: frame.channel.unwrap_or_default(),
                reason,
            })
        }
        "pusher:error" => Incoming::Notify(TransportNotification::Error {
            message: frame.data_string(),
        }),
        event if event.starts_with("pusher") => Incoming::Ignore,
        _ => match frame.channel.clone() {
            Some(channel) => Incoming::Notify(TransportNotification::Event {
                channel,
                event: frame.event.clone(),
                data: frame.data_string(),
            }),
            None => Incoming::Ignore,
        },
    }
}

/// Realtime transport backed by a Pusher-compatible WebSocket server.
pub struct PusherTransport {
    config: PusherConfig,
}

impl PusherTransport {
    pub fn new(config: PusherConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for PusherTransport {
    async fn open(
        &self,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Result<TransportHandle, TransportError> {
        let url = self.config.url();
        debug!(url = %url, "Opening realtime connection");

        let (socket, _response) = connect_async(url.as_str()).await?;
        let (mut ws_tx, mut ws_rx) = socket.split();

        // Handshake: the first meaningful frame carries our socket id.
        let socket_id = tokio::time::timeout(self.config.handshake_timeout, async {
            while let Some(msg) = ws_rx.next().await {
                let text = match msg? {
                    Message::Text(text) => text,
                    _ => continue,
                };
                let frame: Frame = serde_json::from_str(&text)
                    .map_err(|e| TransportError::Handshake(e.to_string()))?;
                match frame.event.as_str() {
                    "pusher:connection_established" => {
                        let data: Value = serde_json::from_str(&frame.data_string())
                            .map_err(|e| TransportError::Handshake(e.to_string()))?;
                        return data
                            .get("socket_id")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .ok_or_else(|| TransportError::Handshake("missing socket_id".into()));
                    }
                    "pusher:error" => {
                        return Err(TransportError::Handshake(frame.data_string()));
                    }
                    _ => continue,
                }
            }
            Err(TransportError::Handshake("connection closed".into()))
        })
        .await
        .map_err(|_| TransportError::Handshake("timed out".into()))??;

        info!(socket_id = %socket_id, "Realtime connection established");

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<TransportCommand>(64);
        let (notif_tx, notif_rx) = mpsc::channel::<TransportNotification>(256);
        let ping_interval = self.config.ping_interval;
        let task_socket_id = socket_id.clone();

        tokio::spawn(async move {
            let mut ping = tokio::time::interval(ping_interval);
            ping.tick().await;

            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(TransportCommand::Subscribe(channel)) => {
                                match subscribe_frame(authorizer.as_ref(), &task_socket_id, &channel).await {
                                    Ok(frame) => {
                                        if let Err(e) = send_frame(&mut ws_tx, &frame).await {
                                            error!(channel = %channel, error = %e, "Subscribe send failed");
                                            let _ = notif_tx.send(TransportNotification::Error { message: e.to_string() }).await;
                                            break;
                                        }
                                        debug!(channel = %channel, "Subscribe sent");
                                    }
                                    Err(reason) => {
                                        warn!(channel = %channel, reason = %reason, "Channel authorization failed");
                                        let _ = notif_tx
                                            .send(TransportNotification::SubscriptionFailed { channel, reason })
                                            .await;
                                    }
                                }
                            }
                            Some(TransportCommand::Unsubscribe(channel)) => {
                                let frame = json!({
                                    "event": "pusher:unsubscribe",
                                    "data": { "channel": channel },
                                });
                                if let Err(e) = send_frame(&mut ws_tx, &frame).await {
                                    warn!(channel = %channel, error = %e, "Unsubscribe send failed");
                                }
                            }
                            Some(TransportCommand::Shutdown) | None => {
                                debug!("Realtime connection shutdown requested");
                                let _ = ws_tx.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }

                    msg = ws_rx.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => match classify(&text) {
                                Incoming::Ping => {
                                    let pong = json!({ "event": "pusher:pong", "data": {} });
                                    if let Err(e) = send_frame(&mut ws_tx, &pong).await {
                                        warn!(error = %e, "Pong send failed");
                                    }
                                }
                                Incoming::Notify(notification) => {
                                    let _ = notif_tx.send(notification).await;
                                }
                                Incoming::Ignore => {}
                            },
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = ws_tx.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Realtime connection closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(error = %e, "Realtime socket error");
                                let _ = notif_tx.send(TransportNotification::Error { message: e.to_string() }).await;
                                break;
                            }
                        }
                    }

                    _ = ping.tick() => {
                        let frame = json!({ "event": "pusher:ping", "data": {} });
                        if let Err(e) = send_frame(&mut ws_tx, &frame).await {
                            warn!(error = %e, "Keepalive ping failed");
                        }
                    }
                }
            }

            let _ = notif_tx.send(TransportNotification::Closed).await;
            debug!("Realtime event loop terminated");
        });

        Ok(TransportHandle {
            socket_id,
            commands: cmd_tx,
            notifications: notif_rx,
        })
    }
}

async fn subscribe_frame(
    authorizer: &dyn ChannelAuthorizer,
    socket_id: &str,
    channel: &str,
) -> Result<Value, String> {
    if !channel.starts_with("private-") {
        return Ok(json!({ "event": "pusher:subscribe", "data": { "channel": channel } }));
    }
    let auth = authorizer
        .authorize(socket_id, channel)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "event": "pusher:subscribe",
        "data": { "channel": channel, "auth": auth },
    }))
}

async fn send_frame(
    ws_tx: &mut WsSink,
    frame: &Value,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    ws_tx.send(Message::Text(frame.to_string())).await
}
