//! Configuration for the chat engine and the command-line client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default Supabase URL (can be overridden at compile time via SUPABASE_URL env var).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://club-chat.supabase.co",
};

/// Default Supabase publishable key (can be overridden at compile time via SUPABASE_PUBLISHABLE_KEY env var).
pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str = match option_env!("SUPABASE_PUBLISHABLE_KEY") {
    Some(key) => key,
    None => "public-anon-key",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Messages fetched per timeline page.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Quiet period before a realtime burst turns into one message fetch.
pub const DEFAULT_REALTIME_DEBOUNCE_MS: u64 = 300;
/// Lifetime of conversation lists and first message pages in memory.
pub const DEFAULT_SHORT_CACHE_TTL_SECS: u64 = 5 * 60;
/// Lifetime of the persisted open-conversation snapshot.
pub const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 60 * 60;
/// Upper bound for both cache lifetimes (one year).
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 60 * 60;
/// Request timeout applied by the HTTP client.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;
/// Largest attachment accepted for upload (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

const ENV_LOG_LEVEL: &str = "CLUB_CHAT_LOG_LEVEL";
const ENV_SUPABASE_URL: &str = "CLUB_CHAT_SUPABASE_URL";
const ENV_SUPABASE_KEY: &str = "CLUB_CHAT_SUPABASE_KEY";

/// Main chat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Write JSON lines to the log file instead of compact stderr output.
    #[serde(default)]
    pub json_logs: bool,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase publishable API key (public, safe to expose).
    #[serde(default = "default_supabase_publishable_key")]
    pub supabase_publishable_key: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_realtime_debounce_ms")]
    pub realtime_debounce_ms: u64,
    #[serde(default = "default_short_cache_ttl_secs")]
    pub short_cache_ttl_secs: u64,
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_publishable_key() -> String {
    DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_realtime_debounce_ms() -> u64 {
    DEFAULT_REALTIME_DEBOUNCE_MS
}

fn default_short_cache_ttl_secs() -> u64 {
    DEFAULT_SHORT_CACHE_TTL_SECS
}

fn default_snapshot_ttl_secs() -> u64 {
    DEFAULT_SNAPSHOT_TTL_SECS
}

fn default_remote_timeout_secs() -> u64 {
    DEFAULT_REMOTE_TIMEOUT_SECS
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
            supabase_url: DEFAULT_SUPABASE_URL.to_string(),
            supabase_publishable_key: DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            realtime_debounce_ms: DEFAULT_REALTIME_DEBOUNCE_MS,
            short_cache_ttl_secs: DEFAULT_SHORT_CACHE_TTL_SECS,
            snapshot_ttl_secs: DEFAULT_SNAPSHOT_TTL_SECS,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables take precedence over the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Some(log_level) = non_empty_env(ENV_LOG_LEVEL) {
            self.log_level = log_level;
        }
        if let Some(url) = non_empty_env(ENV_SUPABASE_URL) {
            self.supabase_url = url;
        }
        if let Some(key) = non_empty_env(ENV_SUPABASE_KEY) {
            self.supabase_publishable_key = key;
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.page_size == 0 {
            return Err(CoreError::Config("page_size must be at least 1".to_string()));
        }
        if self.max_upload_bytes == 0 {
            return Err(CoreError::Config(
                "max_upload_bytes must be at least 1".to_string(),
            ));
        }
        for (name, secs) in [
            ("short_cache_ttl_secs", self.short_cache_ttl_secs),
            ("snapshot_ttl_secs", self.snapshot_ttl_secs),
        ] {
            if secs > MAX_CACHE_TTL_SECS {
                return Err(CoreError::Config(format!(
                    "{name} must be at most {MAX_CACHE_TTL_SECS}"
                )));
            }
        }
        self.supabase_url()?;
        Ok(())
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }

    pub fn realtime_debounce(&self) -> Duration {
        Duration::from_millis(self.realtime_debounce_ms)
    }

    pub fn short_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.short_cache_ttl_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.realtime_debounce(), Duration::from_millis(300));
        assert_eq!(config.short_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.snapshot_ttl(), Duration::from_secs(3600));
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "page_size": 20
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.realtime_debounce_ms, DEFAULT_REALTIME_DEBOUNCE_MS);
        assert_eq!(config.supabase_url, DEFAULT_SUPABASE_URL);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.snapshot_ttl_secs = 120;
        config.json_logs = true;

        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.snapshot_ttl_secs, 120);
        assert!(loaded.json_logs);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_config_rejects_zero_page_size() {
        let mut config = Config::default();
        config.page_size = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_config_rejects_unbounded_ttl() {
        let mut config = Config::default();
        config.snapshot_ttl_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        config.snapshot_ttl_secs = MAX_CACHE_TTL_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.supabase_url = "not a valid url".to_string();

        assert!(config.supabase_url().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_constants() {
        assert!(!DEFAULT_SUPABASE_PUBLISHABLE_KEY.is_empty());
        assert!(DEFAULT_SUPABASE_URL.starts_with("https://"));
    }
}
