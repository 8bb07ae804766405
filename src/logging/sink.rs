//! Destinations for structured log records.

use std::io::{self, Write};
use std::sync::Mutex;

use thiserror::Error;

use super::structured::{LogRecord, RecordLevel};

/// Errors raised by a sink while writing records.
#[derive(Error, Debug)]
pub enum SinkError {
    /// IO error while writing.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Record could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// A destination for structured records.
///
/// The default sink forwards to `tracing`; hosts attach telemetry backends by
/// implementing this trait.
pub trait LogSink: Send + Sync {
    fn write(&self, record: &LogRecord) -> SinkResult<()>;

    fn flush(&self) -> SinkResult<()> {
        Ok(())
    }
}

/// Sink that forwards records to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, record: &LogRecord) -> SinkResult<()> {
        let error_id = record.error_id.as_deref().unwrap_or("-");
        let error_type = record.error_type.map(|t| t.as_str()).unwrap_or("-");
        let severity = record.severity.map(|s| s.as_str()).unwrap_or("-");
        let context = serde_json::to_string(&record.context)?;

        match record.level {
            RecordLevel::Debug => tracing::debug!(
                target: "faultroute::structured",
                error_id, error_type, severity, %context, "{}", record.message
            ),
            RecordLevel::Info => tracing::info!(
                target: "faultroute::structured",
                error_id, error_type, severity, %context, "{}", record.message
            ),
            RecordLevel::Warn => tracing::warn!(
                target: "faultroute::structured",
                error_id, error_type, severity, %context, "{}", record.message
            ),
            RecordLevel::Error => tracing::error!(
                target: "faultroute::structured",
                error_id, error_type, severity, %context, "{}", record.message
            ),
        }
        Ok(())
    }
}

/// Sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, record: &LogRecord) -> SinkResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// Sink that writes one JSON object per line.
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

impl JsonLinesSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl LogSink for JsonLinesSink {
    fn write(&self, record: &LogRecord) -> SinkResult<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> SinkResult<()> {
        self.writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .flush()?;
        Ok(())
    }
}
