//! Level-filtered diagnostic logger with forwarding hooks.
//!
//! The logger keeps its own minimum level, independent of the process-wide
//! `tracing` filter, so that modules can turn kernel diagnostics up or down at
//! runtime. Entries that pass the threshold are formatted, written to a
//! [`LogSink`] (by default a `tracing` event under the [`CONSOLE_TARGET`]
//! target) and then handed to every registered hook, typically for telemetry
//! forwarding.

use crate::error::KernelError;
use crate::utils::{clock_time, current_timestamp_millis, panic_message};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

/// `tracing` target used for formatted logger lines.
pub const CONSOLE_TARGET: &str = "ng_console";

/// Log severities. `Info` and `Success` share a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    #[default]
    Info,
    Success,
    Warn,
    Error,
    Fatal,
}

impl Level {
    const ALL: [Level; 7] = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Success,
        Level::Warn,
        Level::Error,
        Level::Fatal,
    ];

    /// Position in the severity order used for threshold filtering.
    pub fn rank(self) -> u8 {
        match self {
            Level::Trace => 0,
            Level::Debug => 1,
            Level::Info | Level::Success => 2,
            Level::Warn => 3,
            Level::Error => 4,
            Level::Fatal => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Success => "success",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }

    fn index(self) -> u8 {
        Level::ALL.iter().position(|l| *l == self).unwrap_or(2) as u8
    }

    fn from_index(index: u8) -> Level {
        Level::ALL
            .get(index as usize)
            .copied()
            .unwrap_or(Level::Info)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .iter()
            .copied()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| KernelError::InvalidLogLevel(s.to_string()))
    }
}

/// A single diagnostic entry, handed to hooks and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub message: String,
    pub level: Level,
    pub resource: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub metadata: Option<Value>,
}

impl LogEntry {
    /// Renders the console line: `[HH:MM:SS] [resource] LEVEL   message {metadata}`.
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "[{}] [{}] {:<7} {}",
            clock_time(self.timestamp),
            self.resource,
            self.level.as_str().to_uppercase(),
            self.message
        );
        if let Some(Value::Object(map)) = &self.metadata {
            if !map.is_empty() {
                line.push(' ');
                line.push_str(&Value::Object(map.clone()).to_string());
            }
        }
        line
    }
}

/// Destination for formatted log lines.
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &LogEntry, line: &str);
}

/// Writes each line as a `tracing` event under [`CONSOLE_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, entry: &LogEntry, line: &str) {
        let resource = entry.resource.as_str();
        match entry.level {
            Level::Trace => tracing::trace!(target: CONSOLE_TARGET, resource, "{}", line),
            Level::Debug => tracing::debug!(target: CONSOLE_TARGET, resource, "{}", line),
            Level::Info | Level::Success => {
                tracing::info!(target: CONSOLE_TARGET, resource, "{}", line)
            }
            Level::Warn => tracing::warn!(target: CONSOLE_TARGET, resource, "{}", line),
            Level::Error | Level::Fatal => {
                tracing::error!(target: CONSOLE_TARGET, resource, "{}", line)
            }
        }
    }
}

type LogHook = Arc<dyn Fn(&LogEntry) + Send + Sync>;

struct LoggerInner {
    resource: String,
    threshold: AtomicU8,
    hooks: RwLock<Vec<LogHook>>,
    sink: Arc<dyn LogSink>,
}

/// Kernel logger handle. Clones share threshold, hooks and sink.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("resource", &self.inner.resource)
            .field("level", &self.level())
            .finish()
    }
}

impl Logger {
    /// Creates a logger for `resource` writing to [`TracingSink`].
    pub fn new(resource: impl Into<String>, level: Level) -> Self {
        Self::with_sink(resource, level, Arc::new(TracingSink))
    }

    pub fn with_sink(resource: impl Into<String>, level: Level, sink: Arc<dyn LogSink>) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                resource: resource.into(),
                threshold: AtomicU8::new(level.index()),
                hooks: RwLock::new(Vec::new()),
                sink,
            }),
        }
    }

    pub fn level(&self) -> Level {
        Level::from_index(self.inner.threshold.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: Level) {
        self.inner.threshold.store(level.index(), Ordering::Relaxed);
    }

    /// Parses and applies a level name; unknown names leave the threshold unchanged.
    pub fn set_level_str(&self, level: &str) -> Result<(), KernelError> {
        let level = level.parse::<Level>()?;
        self.set_level(level);
        Ok(())
    }

    /// Registers a forwarding hook. Hooks cannot be removed.
    pub fn add_hook<F>(&self, hook: F)
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.inner
            .hooks
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    pub fn enabled(&self, level: Level) -> bool {
        level.rank() >= self.level().rank()
    }

    /// Writes an entry if `level` passes the threshold.
    ///
    /// Dropped entries produce neither sink output nor hook calls. A hook
    /// that panics is ignored.
    pub fn write(&self, message: &str, level: Level, metadata: Option<Value>) {
        if !self.enabled(level) {
            return;
        }

        let entry = LogEntry {
            message: message.to_string(),
            level,
            resource: self.inner.resource.clone(),
            timestamp: current_timestamp_millis(),
            metadata,
        };
        self.inner.sink.write(&entry, &entry.format_line());

        let hooks = self
            .inner
            .hooks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        for hook in hooks {
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| hook(&entry))) {
                tracing::debug!("log hook panicked: {}", panic_message(payload));
            }
        }
    }

    pub fn trace(&self, message: &str) {
        self.write(message, Level::Trace, None)
    }

    pub fn debug(&self, message: &str) {
        self.write(message, Level::Debug, None)
    }

    pub fn info(&self, message: &str) {
        self.write(message, Level::Info, None)
    }

    pub fn success(&self, message: &str) {
        self.write(message, Level::Success, None)
    }

    pub fn warn(&self, message: &str) {
        self.write(message, Level::Warn, None)
    }

    pub fn error(&self, message: &str) {
        self.write(message, Level::Error, None)
    }

    pub fn fatal(&self, message: &str) {
        self.write(message, Level::Fatal, None)
    }
}
