use thiserror::Error;

/// Errors returned by the REST backend client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Backend responded with status {0}")]
    Status(u16),

    #[error("Unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Errors raised while opening or driving the realtime transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Realtime transport is not configured")]
    NotConfigured,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Channel authorization failed for {channel}: {reason}")]
    Authorization { channel: String, reason: String },

    #[error("Transport task is gone")]
    Closed,
}
