use thiserror::Error;

use umrah_net::ApiError;

/// Reasons a credential could not be turned into an identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Token expired")]
    Expired,

    #[error("Backend reported no role for the user")]
    MissingRole,
}

/// Errors surfaced by user-initiated chat operations.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("No conversation is open")]
    NoConversation,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Unknown message")]
    UnknownMessage,

    #[error("Session is no longer mounted")]
    Unmounted,

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type Result<T> = std::result::Result<T, ChatError>;
