use thiserror::Error;

/// Errors raised while decoding realtime or push payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}
