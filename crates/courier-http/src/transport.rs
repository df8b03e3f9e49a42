//! The retry loop: encode once, then send, parse, decide and wait until the
//! policy stops or the caller cancels.

use courier_log::sink::{LogEvent, LogSink, OutcomeKind};
use courier_log::spans::{attempt_span, call_span, record_error, Timer};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn, Instrument, Span};

use crate::cancel::CancellationWatcher;
use crate::encode::{RequestEncoder, WireRequest};
use crate::engine::{Engine, RawReply, ReqwestEngine};
use crate::error::{describe_timeout, HttpError, RequestFailure, TransportError};
use crate::parser::parse_head;
use crate::request::RequestSpec;
use crate::response::Response;
use crate::retry::{AttemptOutcome, RetryDecision, RetryPolicy};

/// Executes logical calls against an [`Engine`].
///
/// Holds no per-call state, so one transport serves any number of
/// concurrent calls.
pub struct Transport<E: Engine = ReqwestEngine> {
    engine: E,
    encoder: RequestEncoder,
    policy: RetryPolicy,
    sink: Arc<dyn LogSink>,
}

impl<E: Engine> std::fmt::Debug for Transport<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("encoder", &self.encoder)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<E: Engine> Transport<E> {
    /// Transport over `engine`. Every attempt is reported to `sink`.
    pub fn new(
        engine: E,
        encoder: RequestEncoder,
        policy: RetryPolicy,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            engine,
            encoder,
            policy,
            sink,
        }
    }

    /// The engine performing physical exchanges.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Encoder applied once per logical call.
    pub fn encoder(&self) -> &RequestEncoder {
        &self.encoder
    }

    /// Retry policy consulted after every attempt.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one logical call without cancellation.
    pub async fn send(&self, spec: &RequestSpec) -> Result<Response, HttpError> {
        self.send_with_cancel(spec, None).await
    }

    /// Run one logical call. `cancel` is honoured while sending and while
    /// waiting between attempts.
    pub async fn send_with_cancel(
        &self,
        spec: &RequestSpec,
        cancel: Option<CancellationWatcher>,
    ) -> Result<Response, HttpError> {
        let span = call_span(spec.method().as_str(), spec.uri());
        self.run(spec, cancel).instrument(span).await
    }

    async fn run(
        &self,
        spec: &RequestSpec,
        mut cancel: Option<CancellationWatcher>,
    ) -> Result<Response, HttpError> {
        let wire = self.encoder.encode(spec)?;

        if cancel.as_ref().is_some_and(CancellationWatcher::is_cancelled) {
            return Err(HttpError::Cancelled { attempts: 0 });
        }

        let mut attempt = 0u32;
        loop {
            let attempts = attempt + 1;
            let timer = Timer::start();
            let span = attempt_span(attempt);

            let sent = until_cancelled(cancel.as_mut(), self.exchange(&wire))
                .instrument(span.clone())
                .await;

            let outcome = match sent {
                None => {
                    let message = "cancelled while sending".to_string();
                    self.emit(&wire, attempt, OutcomeKind::Cancelled, None, &timer, message);
                    debug!(attempts, "call cancelled while sending");
                    return Err(HttpError::Cancelled { attempts });
                }
                Some(Ok(reply)) => match parse_head(&reply.head) {
                    Ok(head) => AttemptOutcome::Success(Response::from_head(head, reply.body)),
                    Err(e) => {
                        let message = e.to_string();
                        self.emit(&wire, attempt, OutcomeKind::Malformed, None, &timer, message);
                        warn!(attempts, error = %e, "malformed response");
                        Span::current().record("attempts", attempts);
                        record_error(&e);
                        return Err(HttpError::RequestFailed {
                            attempts,
                            cause: RequestFailure::MalformedResponse(e),
                        });
                    }
                },
                Some(Err(e)) => AttemptOutcome::TransportError(e),
            };

            let status = outcome.status();
            if let Some(status) = status {
                span.record("status", status);
            }

            match self.policy.decide(attempt, &outcome) {
                RetryDecision::Retry { delay } => {
                    let message = match &outcome {
                        AttemptOutcome::Success(r) => {
                            format!("status {}, retrying in {}ms", r.status(), delay.as_millis())
                        }
                        AttemptOutcome::TransportError(e) => {
                            format!("{e}, retrying in {}ms", delay.as_millis())
                        }
                    };
                    self.emit(&wire, attempt, OutcomeKind::Retrying, status, &timer, message);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling retry");

                    let slept = until_cancelled(cancel.as_mut(), tokio::time::sleep(delay)).await;
                    if slept.is_none() {
                        debug!(attempts, "call cancelled while waiting");
                        return Err(HttpError::Cancelled { attempts });
                    }
                    attempt += 1;
                }
                RetryDecision::Stop => {
                    Span::current().record("attempts", attempts);
                    let retryable = self.policy.is_retryable(&outcome);
                    return match outcome {
                        AttemptOutcome::Success(response) => {
                            let message = if retryable {
                                format!("status {}, retries exhausted", response.status())
                            } else {
                                format!("status {}", response.status())
                            };
                            let kind = OutcomeKind::Success;
                            self.emit(&wire, attempt, kind, status, &timer, message);
                            if retryable {
                                let error = HttpError::RequestFailed {
                                    attempts,
                                    cause: RequestFailure::RetriesExhausted(Box::new(response)),
                                };
                                record_error(&error);
                                Err(error)
                            } else {
                                Ok(response)
                            }
                        }
                        AttemptOutcome::TransportError(e) => {
                            let message = e.to_string();
                            let kind = OutcomeKind::TransportError;
                            self.emit(&wire, attempt, kind, None, &timer, message);
                            warn!(attempts, error = %e, "request failed");
                            record_error(&e);
                            Err(HttpError::RequestFailed {
                                attempts,
                                cause: RequestFailure::Transport(e),
                            })
                        }
                    };
                }
            }
        }
    }

    /// One physical attempt bounded by the per-attempt timeout.
    async fn exchange(&self, wire: &WireRequest) -> Result<RawReply, TransportError> {
        match tokio::time::timeout(wire.timeout, self.engine.execute(wire)).await {
            Ok(result) => result,
            Err(_) => {
                debug!("{}", describe_timeout(wire.timeout));
                Err(TransportError::Timeout)
            }
        }
    }

    fn emit(
        &self,
        wire: &WireRequest,
        attempt: u32,
        outcome: OutcomeKind,
        status: Option<u16>,
        timer: &Timer,
        message: String,
    ) {
        let event = LogEvent {
            method: wire.method.as_str().to_string(),
            uri: wire.uri.to_string(),
            attempt,
            outcome,
            status,
            elapsed_ms: timer.elapsed_ms(),
            message,
        };
        match catch_unwind(AssertUnwindSafe(|| self.sink.log(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(error = %e, "log sink failed"),
            Err(_) => trace!("log sink panicked"),
        }
    }
}

/// Drive `fut` unless the watcher fires first.
async fn until_cancelled<F: Future>(
    cancel: Option<&mut CancellationWatcher>,
    fut: F,
) -> Option<F::Output> {
    match cancel {
        Some(watcher) => tokio::select! {
            biased;
            _ = watcher.cancelled() => None,
            out = fut => Some(out),
        },
        None => Some(fut.await),
    }
}
