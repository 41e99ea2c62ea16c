//! Core configuration and utilities shared by the club-chat crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_LOG_LEVEL, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PAGE_SIZE,
    DEFAULT_REALTIME_DEBOUNCE_MS, DEFAULT_REMOTE_TIMEOUT_SECS, DEFAULT_SHORT_CACHE_TTL_SECS,
    DEFAULT_SNAPSHOT_TTL_SECS, DEFAULT_SUPABASE_PUBLISHABLE_KEY, DEFAULT_SUPABASE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogConfig, LogFormat, LogWriter};
pub use paths::Paths;
