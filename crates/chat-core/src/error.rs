//! Error taxonomy for chat operations.

use thiserror::Error;

/// Errors surfaced by the chat engine and its ports.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No authenticated session, or the session was rejected.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The requested profile or message does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller may not perform the operation (e.g. deleting a peer's message).
    #[error("Permission denied: {0}")]
    Permission(String),

    /// The remote store failed or timed out.
    #[error("Remote store error: {0}")]
    RemoteStore(String),

    /// The request was rejected before reaching the store.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias using ChatError.
pub type ChatResult<T> = Result<T, ChatError>;
