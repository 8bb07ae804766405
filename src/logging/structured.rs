//! Structured logger for classified errors.
//!
//! Each call builds a `LogRecord`, runs its context through the `Sanitizer`
//! and hands it to the configured `LogSink`. With a batch size above one,
//! records are buffered and flushed when the batch fills, when the optional
//! flush timer fires, or on `destroy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use super::sanitize::{Sanitizer, DEFAULT_REDACTION_MARKER};
use super::sink::{LogSink, TracingSink};
use crate::error::{ClassifiedError, ErrorSeverity, ErrorType};

/// Level of a structured record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<ErrorSeverity> for RecordLevel {
    fn from(severity: ErrorSeverity) -> Self {
        match severity {
            ErrorSeverity::Low => RecordLevel::Info,
            ErrorSeverity::Medium => RecordLevel::Warn,
            ErrorSeverity::High | ErrorSeverity::Critical => RecordLevel::Error,
        }
    }
}

/// A single structured log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub level: RecordLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ErrorSeverity>,
    pub timestamp: DateTime<Utc>,
    /// Sanitized context.
    pub context: Value,
}

impl LogRecord {
    /// Builds a plain message record. The context is stored as given.
    pub fn message(level: RecordLevel, message: impl Into<String>, context: Value) -> Self {
        Self {
            level,
            message: message.into(),
            error_id: None,
            error_type: None,
            severity: None,
            timestamp: Utc::now(),
            context,
        }
    }
}

/// Structured logger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Records per batch; 1 writes every record immediately.
    pub batch_size: usize,
    /// Period of the background flush timer, in milliseconds. 0 disables it.
    pub flush_interval_ms: u64,
    pub redaction_marker: String,
    /// Keys redacted in addition to the built-in deny-list.
    pub extra_sensitive_keys: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            flush_interval_ms: 0,
            redaction_marker: DEFAULT_REDACTION_MARKER.to_string(),
            extra_sensitive_keys: Vec::new(),
        }
    }
}

impl LoggerConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms))
    }

    pub fn sanitizer(&self) -> Sanitizer {
        Sanitizer::new()
            .with_marker(self.redaction_marker.clone())
            .with_extra_keys(&self.extra_sensitive_keys)
    }
}

/// Sanitizing structured logger with a pluggable sink.
pub struct StructuredLogger {
    sink: Arc<dyn LogSink>,
    sanitizer: Sanitizer,
    batch_size: usize,
    flush_interval: Option<Duration>,
    buffer: Mutex<Vec<LogRecord>>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredLogger")
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("buffered", &self.buffered())
            .finish()
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl StructuredLogger {
    /// Logger writing every record straight to `sink`.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self::with_config(sink, &LoggerConfig::default())
    }

    pub fn with_config(sink: Arc<dyn LogSink>, config: &LoggerConfig) -> Self {
        Self {
            sink,
            sanitizer: config.sanitizer(),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
            buffer: Mutex::new(Vec::new()),
            flush_task: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Logs a classified error, merged with optional extra context.
    ///
    /// The record level follows severity: LOW is info, MEDIUM warn, HIGH and
    /// CRITICAL error.
    pub fn log_error(&self, error: &ClassifiedError, context: Option<&Value>) {
        let mut merged = match error.context.to_value() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(status) = error.status_code {
            merged.insert("statusCode".to_string(), Value::from(status));
        }
        match context {
            Some(Value::Object(extra)) => {
                for (key, value) in extra {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                merged.insert("extra".to_string(), other.clone());
            }
        }

        let record = LogRecord {
            level: RecordLevel::from(error.severity),
            message: error.message.clone(),
            error_id: Some(error.error_id.clone()),
            error_type: Some(error.error_type),
            severity: Some(error.severity),
            timestamp: Utc::now(),
            context: self.sanitizer.sanitize(&Value::Object(merged)),
        };
        self.emit(record);
    }

    pub fn log_info(&self, message: &str, context: &Value) {
        self.log_message(RecordLevel::Info, message, context);
    }

    pub fn log_warn(&self, message: &str, context: &Value) {
        self.log_message(RecordLevel::Warn, message, context);
    }

    pub fn log_debug(&self, message: &str, context: &Value) {
        self.log_message(RecordLevel::Debug, message, context);
    }

    fn log_message(&self, level: RecordLevel, message: &str, context: &Value) {
        let record = LogRecord::message(level, message, self.sanitizer.sanitize(context));
        self.emit(record);
    }

    fn emit(&self, record: LogRecord) {
        if self.batch_size <= 1 || self.destroyed.load(Ordering::SeqCst) {
            self.write_to_sink(&record);
            return;
        }

        let full = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.push(record);
            buffer.len() >= self.batch_size
        };
        if full {
            self.flush();
        }
    }

    fn write_to_sink(&self, record: &LogRecord) {
        if let Err(e) = self.sink.write(record) {
            tracing::warn!(error = %e, "Failed to write structured log record");
        }
    }

    /// Number of records waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Writes all buffered records to the sink and flushes it.
    pub fn flush(&self) {
        let pending = std::mem::take(&mut *self.buffer.lock().unwrap_or_else(|e| e.into_inner()));
        for record in &pending {
            self.write_to_sink(record);
        }
        if let Err(e) = self.sink.flush() {
            tracing::warn!(error = %e, "Failed to flush structured log sink");
        }
    }

    /// Starts the periodic flush timer on the current tokio runtime.
    ///
    /// Returns false when no interval is configured, no runtime is available,
    /// the timer is already running, or the logger was destroyed.
    pub fn spawn_flush_timer(self: &Arc<Self>) -> bool {
        let Some(interval) = self.flush_interval else {
            return false;
        };
        if self.destroyed.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No tokio runtime; structured log flush timer not started");
            return false;
        };

        let mut task = self.flush_task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return false;
        }

        let logger: Weak<Self> = Arc::downgrade(self);
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match logger.upgrade() {
                    Some(logger) => logger.flush(),
                    None => break,
                }
            }
        }));
        true
    }

    pub fn has_flush_timer(&self) -> bool {
        self.flush_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stops the flush timer and flushes anything still buffered.
    ///
    /// Later records are written straight through. Safe to call repeatedly.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Some(task) = self
            .flush_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.flush();
    }
}

impl Drop for StructuredLogger {
    fn drop(&mut self) {
        if let Some(task) = self
            .flush_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}
