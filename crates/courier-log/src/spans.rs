//! Span helpers for request tracing.

use std::time::{Duration, Instant};
use tracing::{debug_span, info_span, Span};

/// Span covering one logical call, retries included.
///
/// `attempts` and `error` are filled in when the call ends.
pub fn call_span(method: &str, uri: &str) -> Span {
    info_span!(
        "http_call",
        method = %method,
        uri = %uri,
        attempts = tracing::field::Empty,
        error = tracing::field::Empty
    )
}

/// Span covering one physical attempt.
pub fn attempt_span(attempt: u32) -> Span {
    debug_span!("http_attempt", attempt = attempt, status = tracing::field::Empty)
}

/// Record an error on the current span. Only spans declaring an `error`
/// field, such as [`call_span`], keep it.
pub fn record_error(error: &dyn std::error::Error) {
    Span::current().record("error", tracing::field::display(error));
}

/// Wall-clock timer for an operation.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Time elapsed since `start`.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed whole milliseconds, saturating.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
