//! Structured per-attempt log events and the sinks that receive them.
//!
//! The transport reports every physical attempt through a [`LogSink`]. Sinks
//! are fallible, but a failing sink never aborts a request: the caller drops
//! the error. Use the named constructors ([`noop`], [`stream`],
//! [`stream_json`], [`tracing_sink`], [`from_fn`]) instead of building the adapter
//! types by hand.

use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// A response was received and returned to the caller.
    Success,
    /// A response or failure was received and another attempt is scheduled.
    Retrying,
    /// No response was received and retries are exhausted.
    TransportError,
    /// The reply could not be parsed.
    Malformed,
    /// The caller cancelled the call.
    Cancelled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Retrying => "retrying",
            OutcomeKind::TransportError => "transport_error",
            OutcomeKind::Malformed => "malformed",
            OutcomeKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One structured event per physical attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Absolute request URI.
    pub uri: String,
    /// Zero-indexed attempt number.
    pub attempt: u32,
    /// How the attempt ended.
    pub outcome: OutcomeKind,
    /// Status code when a response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Time spent on the attempt.
    pub elapsed_ms: u64,
    /// Human-readable summary.
    pub message: String,
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} attempt={} outcome={}",
            self.method, self.uri, self.attempt, self.outcome
        )?;
        if let Some(status) = self.status {
            write!(f, " status={status}")?;
        }
        write!(f, " elapsed_ms={} {}", self.elapsed_ms, self.message)
    }
}

/// Sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to write log event: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize log event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("log sink lock poisoned")]
    Poisoned,

    #[error("log sink rejected event: {0}")]
    Rejected(String),
}

/// Destination for per-attempt events.
pub trait LogSink: Send + Sync {
    /// Record one event.
    fn log(&self, event: &LogEvent) -> Result<(), SinkError>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn log(&self, _event: &LogEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes one line per event to any `Write` implementation.
pub struct StreamSink<W> {
    writer: Mutex<W>,
    json: bool,
}

impl<W: Write + Send> StreamSink<W> {
    /// Plain text lines.
    pub fn text(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            json: false,
        }
    }

    /// One JSON object per line.
    pub fn json(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            json: true,
        }
    }

    /// Consume the sink and return the writer.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer.into_inner().map_err(|_| SinkError::Poisoned)
    }
}

impl<W: Write + Send> LogSink for StreamSink<W> {
    fn log(&self, event: &LogEvent) -> Result<(), SinkError> {
        let line = if self.json {
            serde_json::to_string(event)?
        } else {
            event.to_string()
        };
        let mut writer = self.writer.lock().map_err(|_| SinkError::Poisoned)?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Forwards events to the `tracing` ecosystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, event: &LogEvent) -> Result<(), SinkError> {
        match event.outcome {
            OutcomeKind::Success | OutcomeKind::Retrying => tracing::info!(
                target: "courier::attempt",
                method = %event.method,
                uri = %event.uri,
                attempt = event.attempt,
                outcome = %event.outcome,
                status = ?event.status,
                elapsed_ms = event.elapsed_ms,
                "{}",
                event.message
            ),
            _ => tracing::warn!(
                target: "courier::attempt",
                method = %event.method,
                uri = %event.uri,
                attempt = event.attempt,
                outcome = %event.outcome,
                status = ?event.status,
                elapsed_ms = event.elapsed_ms,
                "{}",
                event.message
            ),
        }
        Ok(())
    }
}

/// Wraps a closure.
pub struct FnSink<F>(F);

impl<F> LogSink for FnSink<F>
where
    F: Fn(&LogEvent) -> Result<(), SinkError> + Send + Sync,
{
    fn log(&self, event: &LogEvent) -> Result<(), SinkError> {
        (self.0)(event)
    }
}

/// Sink that drops everything. This is the client default.
pub fn noop() -> Arc<dyn LogSink> {
    Arc::new(NoopSink)
}

/// Text lines written to `writer`.
pub fn stream<W: Write + Send + 'static>(writer: W) -> Arc<dyn LogSink> {
    Arc::new(StreamSink::text(writer))
}

/// JSON lines written to `writer`.
pub fn stream_json<W: Write + Send + 'static>(writer: W) -> Arc<dyn LogSink> {
    Arc::new(StreamSink::json(writer))
}

/// Events re-emitted as `tracing` events under the `courier::attempt` target.
pub fn tracing_sink() -> Arc<dyn LogSink> {
    Arc::new(TracingSink)
}

/// Events handed to a closure.
pub fn from_fn<F>(f: F) -> Arc<dyn LogSink>
where
    F: Fn(&LogEvent) -> Result<(), SinkError> + Send + Sync + 'static,
{
    Arc::new(FnSink(f))
}
