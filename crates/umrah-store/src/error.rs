use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no platform data directory for the asset cache")]
    NoDataDir,

    #[error("cache directory: {0}")]
    Io(#[from] std::io::Error),

    /// A schema step failed; carries the step name.
    #[error("schema step {step} failed: {source}")]
    Migration {
        step: &'static str,
        source: rusqlite::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
