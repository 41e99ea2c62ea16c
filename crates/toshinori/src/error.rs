//! Error types for Supabase operations.

use chat_core::ChatError;
use thiserror::Error;

/// Postgres error code for an RLS / privilege violation.
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Error type for all Toshinori operations.
#[derive(Debug, Error)]
pub enum ToshinoriError {
    /// Network or transport-level HTTP error from reqwest.
    ///
    /// Includes connection failures, timeouts, and TLS errors.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Supabase API returned a non-success HTTP status.
    #[error("Supabase error: {status} - {message}")]
    Supabase {
        /// The HTTP status code returned by Supabase.
        status: u16,
        /// The response body, typically containing error details.
        message: String,
    },

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A row was decoded but violates the expected shape.
    #[error("Invalid {table} row: {reason}")]
    InvalidRow { table: &'static str, reason: String },

    /// Configuration or initialization error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for Toshinori operations.
pub type ToshinoriResult<T> = Result<T, ToshinoriError>;

impl From<ToshinoriError> for ChatError {
    fn from(err: ToshinoriError) -> Self {
        match &err {
            ToshinoriError::Supabase { status: 401, .. } => {
                ChatError::Authentication(err.to_string())
            }
            ToshinoriError::Supabase { status: 403, .. } => ChatError::Permission(err.to_string()),
            ToshinoriError::Supabase { message, .. }
                if message.contains(PG_INSUFFICIENT_PRIVILEGE) =>
            {
                ChatError::Permission(err.to_string())
            }
            _ => ChatError::RemoteStore(err.to_string()),
        }
    }
}
