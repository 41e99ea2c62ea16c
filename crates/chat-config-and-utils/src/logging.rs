//! Logging initialization.
//!
//! Compact output goes to stderr. JSON output is appended line by line to
//! `~/.club-chat/logs/chat.jsonl` so several client processes can share it.
//! `RUST_LOG` always wins over the configured level.

use crate::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format for the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Logging options resolved from [`crate::Config`] and the command line.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub default_level: String,
    pub format: LogFormat,
    /// Destination for JSON lines. Required when `format` is `Json`.
    pub log_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: crate::DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Compact,
            log_path: None,
        }
    }
}

/// Append-only file writer shared by every tracing event.
#[derive(Clone)]
pub struct LogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl LogWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        // Flush per line so concurrent readers see complete records.
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed or the log file cannot be
/// opened.
pub fn init_logging(config: &LogConfig) -> CoreResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(&config.default_level).as_str()));

    let installed = match config.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .finish()
            .try_init(),
        LogFormat::Json => {
            let path = config.log_path.as_deref().ok_or_else(|| {
                CoreError::Config("JSON logging requires a log file path".to_string())
            })?;
            let writer = LogWriter::new(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(false)
                .with_writer(writer)
                .finish()
                .try_init()
        }
    };

    installed.map_err(|e| CoreError::Config(format!("logging already initialized: {e}")))?;

    tracing::debug!(level = %config.default_level, format = ?config.format, "logging initialized");
    Ok(())
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
