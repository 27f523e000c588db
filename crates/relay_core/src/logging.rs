//! Logging setup and the structured log sink handed to gateway components.
//!
//! Components never reach for a global logger. They receive an
//! `Arc<dyn LogSink>` and call [`LogSink::log`] with a level, a message and a
//! map of structured fields. The default [`TracingSink`] forwards to
//! `tracing`, whose subscriber is installed once by [`init_logging`].

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::GatewayConfig;

// ---------------------------------------------------------------------------
// Sink contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Structured key/value context attached to a log line.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Build a [`Fields`] map from `key => value` pairs.
#[macro_export]
macro_rules! fields {
    () => { $crate::logging::Fields::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::logging::Fields::new();
        $( map.insert(($key).to_string(), ::serde_json::json!($value)); )+
        map
    }};
}

/// Destination for gateway log records. Implementations must not block.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &Fields);
}

/// Forwards records to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str, fields: &Fields) {
        let rendered = render_fields(fields);
        match level {
            LogLevel::Debug => tracing::debug!(target: "relay", fields = %rendered, "{message}"),
            LogLevel::Info => tracing::info!(target: "relay", fields = %rendered, "{message}"),
            LogLevel::Warning => tracing::warn!(target: "relay", fields = %rendered, "{message}"),
            LogLevel::Error => tracing::error!(target: "relay", fields = %rendered, "{message}"),
            LogLevel::Fatal => {
                tracing::error!(target: "relay", fatal = true, fields = %rendered, "{message}")
            }
        }
    }
}

fn render_fields(fields: &Fields) -> String {
    fields
        .iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => format!("{k}={s}"),
            other => format!("{k}={other}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: LogLevel, _message: &str, _fields: &Fields) {}
}

/// A captured log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub fields: Fields,
}

/// Keeps every record in memory. Used to assert on logging in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records whose message contains `needle`.
    pub fn matching(&self, needle: &str) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message.contains(needle))
            .cloned()
            .collect()
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, message: &str, fields: &Fields) {
        self.records.lock().push(LogRecord {
            level,
            message: message.to_string(),
            fields: fields.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Subscriber initialization
// ---------------------------------------------------------------------------

/// Initializes file + console logging under `~/.relay/logs`.
/// Returns a guard that must be kept alive for the duration of the process.
pub fn init_logging(filter: &str) -> Result<WorkerGuard> {
    let logs_dir = GatewayConfig::logs_dir()?;
    init_logging_to_dir(&logs_dir, filter)
}

/// Initialize logging to a custom directory with a fallback filter.
/// `RUST_LOG` takes precedence over `filter` when set.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    // File appender: daily rotation
    let file_appender = tracing_appender::rolling::daily(logs_dir, "relay");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
