//! Persistence abstraction for the chat client.
//!
//! The chat engine only needs a small string key/value surface to keep the
//! open conversation across restarts. Two backends are provided:
//! - **SQLite** via `rusqlite`, one row per key
//! - **Memory**, for tests and ephemeral sessions

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::PersistentStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite backend error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
