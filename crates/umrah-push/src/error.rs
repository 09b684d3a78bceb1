use thiserror::Error;

use umrah_store::StoreError;

/// Errors raised inside the push worker.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch of {url} failed with status {status}")]
    FetchStatus { url: String, status: u16 },

    #[error("Network unavailable for {0}")]
    Offline(String),

    #[error("Push worker has stopped")]
    WorkerGone,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PushError>;
