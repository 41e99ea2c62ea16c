//! File system locations used by the chat client.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

const BASE_DIR_NAME: &str = ".club-chat";
const CACHE_DB_NAME: &str = "chat-cache.sqlite";
const LOG_FILE_NAME: &str = "chat.jsonl";

/// Manages file system paths for the chat client.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for config, cache and logs (~/.club-chat)
    base_dir: PathBuf,
}

impl Paths {
    /// Resolve paths under `~/.club-chat`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.club-chat/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the persistent cache database (~/.club-chat/chat-cache.sqlite).
    pub fn cache_database_file(&self) -> PathBuf {
        self.base_dir.join(CACHE_DB_NAME)
    }

    /// Get the logs directory (~/.club-chat/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSON log file (~/.club-chat/logs/chat.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
