//! Retry decisions and backoff.
//!
//! [`RetryPolicy`] is pure apart from jitter, which comes from an injected
//! [`JitterSource`] so tests can pin it. Attempts are zero-indexed: the
//! decision after the initial send uses `attempt = 0`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TransportError;
use crate::response::{Response, ResponseHeaders};

/// What one physical attempt produced.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A response arrived, whatever its status.
    Success(Response),
    /// No response arrived.
    TransportError(TransportError),
}

impl AttemptOutcome {
    /// Status code, when a response arrived.
    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptOutcome::Success(r) => Some(r.status()),
            AttemptOutcome::TransportError(_) => None,
        }
    }
}

/// Result of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then try again.
    Retry { delay: Duration },
    /// Hand the last outcome back to the caller.
    Stop,
}

/// Source of jitter samples in `[0, 1]`.
pub trait JitterSource: Send + Sync {
    /// Next sample. Values outside `[0, 1]` are clamped by the policy.
    fn sample(&self) -> f64;
}

/// Thread-local RNG. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..=1.0)
    }
}

/// Always returns the same sample. `FixedJitter(0.0)` disables jitter.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// Reproducible sequence from a seed.
#[derive(Debug)]
pub struct SeededJitter(Mutex<StdRng>);

impl SeededJitter {
    /// Same seed, same sequence.
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self) -> f64 {
        match self.0.lock() {
            Ok(mut rng) => rng.gen_range(0.0..=1.0),
            Err(_) => 0.0,
        }
    }
}

/// Parse `Retry-After` as a whole number of seconds.
///
/// HTTP-date, fractional and negative values are treated as absent.
pub fn retry_after(headers: &ResponseHeaders) -> Option<Duration> {
    headers
        .first("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_millis(secs.saturating_mul(1000)))
}

/// Whether a status code is worth retrying at all.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Decides whether and when to retry.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    jitter_fraction: f64,
    max_delay: Option<Duration>,
    jitter: Arc<dyn JitterSource>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("jitter_fraction", &self.jitter_fraction)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Up to `max_retries` retries with exponential backoff from
    /// `base_delay` and 10% jitter.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            jitter_fraction: 0.1,
            max_delay: None,
            jitter: Arc::new(ThreadRngJitter),
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Retries allowed after the first attempt.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the first retry. Doubles with every further attempt.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Jitter upper bound as a fraction of the computed delay, clamped to
    /// `[0, 1]`.
    #[must_use]
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Replace the RNG, mostly for deterministic tests.
    #[must_use]
    pub fn with_jitter_source(mut self, source: Arc<dyn JitterSource>) -> Self {
        self.jitter = source;
        self
    }

    /// Cap on the backoff delay, jitter included. Does not apply to
    /// `Retry-After`.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Retries allowed after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Jitter upper bound as a fraction of the backoff.
    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    /// Whether the outcome's class is retryable, ignoring the attempt count.
    pub fn is_retryable(&self, outcome: &AttemptOutcome) -> bool {
        match outcome {
            AttemptOutcome::TransportError(_) => true,
            AttemptOutcome::Success(response) => is_retryable_status(response.status()),
        }
    }

    /// Retryable outcome and attempts left. `attempt` is zero-based.
    pub fn should_retry(&self, attempt: u32, outcome: &AttemptOutcome) -> bool {
        attempt < self.max_retries && self.is_retryable(outcome)
    }

    /// `base * 2^attempt` without jitter, capped by `max_delay`.
    ///
    /// Exact until the product no longer fits a `Duration`, which then
    /// saturates to `Duration::MAX`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.cap(exponential(self.base_delay, attempt))
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Delay before the next attempt.
    ///
    /// A `Retry-After` header on the response wins outright; otherwise the
    /// backoff plus a uniform jitter in `[0, jitter_fraction * backoff]`,
    /// never more than `max_delay`.
    pub fn delay_for(&self, attempt: u32, outcome: &AttemptOutcome) -> Duration {
        if let AttemptOutcome::Success(response) = outcome {
            if let Some(delay) = retry_after(response.headers()) {
                return delay;
            }
        }

        let delay = self.backoff(attempt);
        let sample = self.jitter.sample();
        let sample = if sample.is_finite() {
            sample.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let scale = self.jitter_fraction * sample;
        let jitter =
            Duration::try_from_secs_f64(scale * delay.as_secs_f64()).unwrap_or(Duration::MAX);
        self.cap(delay.saturating_add(jitter))
    }

    /// Retry with a delay, or stop.
    pub fn decide(&self, attempt: u32, outcome: &AttemptOutcome) -> RetryDecision {
        if self.should_retry(attempt, outcome) {
            RetryDecision::Retry {
                delay: self.delay_for(attempt, outcome),
            }
        } else {
            RetryDecision::Stop
        }
    }
}

fn exponential(base: Duration, attempt: u32) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;

    if base.is_zero() {
        return Duration::ZERO;
    }
    let nanos = 1u128
        .checked_shl(attempt)
        .and_then(|factor| base.as_nanos().checked_mul(factor));
    match nanos.map(|n| (u64::try_from(n / NANOS_PER_SEC), n % NANOS_PER_SEC)) {
        Some((Ok(secs), sub)) => Duration::new(secs, sub as u32),
        _ => Duration::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn status(code: u16) -> AttemptOutcome {
        AttemptOutcome::Success(Response::new(code, ResponseHeaders::new(), ""))
    }

    fn status_with_retry_after(code: u16, value: &str) -> AttemptOutcome {
        let headers: ResponseHeaders = [("Retry-After", value)].into_iter().collect();
        AttemptOutcome::Success(Response::new(code, headers, ""))
    }

    fn transport_error() -> AttemptOutcome {
        AttemptOutcome::TransportError(TransportError::Connect("refused".into()))
    }

    fn no_jitter(max_retries: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(base_ms))
            .with_jitter_source(Arc::new(FixedJitter(0.0)))
    }

    #[test]
    fn test_transport_errors_retry() {
        let policy = no_jitter(2, 100);
        assert_eq!(
            policy.decide(0, &transport_error()),
            RetryDecision::Retry { delay: Duration::from_millis(100) }
        );
        assert_eq!(policy.decide(2, &transport_error()), RetryDecision::Stop);
    }

    #[test]
    fn test_retryable_statuses() {
        let policy = no_jitter(3, 10);
        for code in [429, 500, 502, 503, 504, 599] {
            assert!(policy.should_retry(0, &status(code)), "status {code}");
        }
        for code in [200, 201, 301, 304, 400, 401, 404, 428, 430, 499] {
            assert!(!policy.should_retry(0, &status(code)), "status {code}");
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = no_jitter(10, 100);
        let delays: Vec<_> = (0..4).map(|n| policy.delay_for(n, &status(503))).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = no_jitter(5, 100);
        let outcome = status_with_retry_after(503, "5");
        for attempt in 0..5 {
            assert_eq!(policy.delay_for(attempt, &outcome), Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_invalid_retry_after_falls_back() {
        let policy = no_jitter(5, 100);
        for value in ["-1", "1.5", "soon", "Wed, 21 Oct 2015 07:28:00 GMT", ""] {
            let outcome = status_with_retry_after(429, value);
            assert_eq!(
                policy.delay_for(1, &outcome),
                Duration::from_millis(200),
                "value {value:?}"
            );
        }
    }

    #[test]
    fn test_retry_after_ignores_max_delay() {
        let policy = no_jitter(5, 100).with_max_delay(Duration::from_millis(150));
        assert_eq!(policy.delay_for(3, &status(503)), Duration::from_millis(150));
        assert_eq!(
            policy.delay_for(3, &status_with_retry_after(503, "2")),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_full_jitter_adds_fraction() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000))
            .with_jitter_source(Arc::new(FixedJitter(1.0)));
        assert_eq!(policy.delay_for(0, &status(500)), Duration::from_millis(1100));

        let policy = policy.with_jitter_fraction(0.5);
        assert_eq!(policy.delay_for(1, &status(500)), Duration::from_millis(3000));
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let a = RetryPolicy::new(3, Duration::from_millis(1000))
            .with_jitter_source(Arc::new(SeededJitter::new(7)));
        let b = RetryPolicy::new(3, Duration::from_millis(1000))
            .with_jitter_source(Arc::new(SeededJitter::new(7)));
        for n in 0..3 {
            assert_eq!(a.delay_for(n, &status(500)), b.delay_for(n, &status(500)));
        }
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = no_jitter(u32::MAX, 1000);
        let delay = policy.delay_for(200, &transport_error());
        assert!(delay >= Duration::from_secs(u64::from(u32::MAX)));
    }

    #[test]
    fn test_backoff_exact_past_32_doublings() {
        let policy = no_jitter(u32::MAX, 1);
        assert_eq!(policy.backoff(32), Duration::from_millis(1 << 32));
        assert_eq!(policy.backoff(40), Duration::new(1_099_511_627, 776_000_000));
        assert_eq!(policy.backoff(64), Duration::new(18_446_744_073_709_551, 616_000_000));
        assert_eq!(policy.backoff(75), Duration::MAX);
    }

    #[test]
    fn test_zero_base_never_grows() {
        let policy = no_jitter(u32::MAX, 0);
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(u32::MAX), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_under_max_delay() {
        let cap = Duration::from_millis(150);
        let policy = RetryPolicy::new(5, Duration::from_millis(100))
            .with_jitter_fraction(1.0)
            .with_jitter_source(Arc::new(FixedJitter(1.0)))
            .with_max_delay(cap);
        assert_eq!(policy.delay_for(0, &status(503)), cap);
        assert_eq!(policy.delay_for(4, &status(503)), cap);
        assert_eq!(policy.delay_for(u32::MAX, &transport_error()), cap);
    }

    #[test]
    fn test_saturated_backoff_with_jitter() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(1))
            .with_jitter_fraction(1.0)
            .with_jitter_source(Arc::new(FixedJitter(1.0)));
        assert_eq!(policy.delay_for(500, &transport_error()), Duration::MAX);
    }

    #[test]
    fn test_none_never_retries() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.decide(0, &transport_error()), RetryDecision::Stop);
        assert_eq!(policy.decide(0, &status(503)), RetryDecision::Stop);
    }

    proptest! {
        #[test]
        fn prop_exhausted_attempts_stop(max in 0u32..20, extra in 0u32..50, code in 100u16..600) {
            let policy = no_jitter(max, 10);
            prop_assert_eq!(policy.decide(max + extra, &status(code)), RetryDecision::Stop);
            prop_assert_eq!(policy.decide(max + extra, &transport_error()), RetryDecision::Stop);
        }

        #[test]
        fn prop_retryable_statuses_retry(
            max in 1u32..20,
            code in prop_oneof![Just(429u16), 500u16..600],
        ) {
            let policy = no_jitter(max, 10);
            for attempt in 0..max {
                let decision = policy.decide(attempt, &status(code));
                let retry = matches!(decision, RetryDecision::Retry { .. });
                prop_assert!(retry);
            }
        }

        #[test]
        fn prop_other_statuses_stop(
            max in 1u32..20,
            code in prop_oneof![200u16..429, 430u16..500],
        ) {
            let policy = no_jitter(max, 10);
            prop_assert_eq!(policy.decide(0, &status(code)), RetryDecision::Stop);
        }

        #[test]
        fn prop_backoff_without_jitter(base in 1u64..10_000, n in 0u32..80) {
            let policy = no_jitter(u32::MAX, base);
            let expected = (0..n)
                .try_fold(Duration::from_millis(base), |delay, _| delay.checked_mul(2))
                .unwrap_or(Duration::MAX);
            prop_assert_eq!(policy.delay_for(n, &transport_error()), expected);
        }

        #[test]
        fn prop_jitter_within_bounds(base in 1u64..10_000, n in 0u32..10, seed in any::<u64>()) {
            let policy = RetryPolicy::new(u32::MAX, Duration::from_millis(base))
                .with_jitter_source(Arc::new(SeededJitter::new(seed)));
            let backoff = Duration::from_millis(base * 2u64.pow(n));
            let delay = policy.delay_for(n, &transport_error());
            prop_assert!(delay >= backoff);
            prop_assert!(delay <= backoff + backoff.mul_f64(0.1) + Duration::from_nanos(1));
        }

        #[test]
        fn prop_retry_after_is_exact(secs in 0u64..100_000, n in 0u32..30, base in 0u64..5_000) {
            let policy = no_jitter(u32::MAX, base);
            let outcome = status_with_retry_after(503, &secs.to_string());
            prop_assert_eq!(policy.delay_for(n, &outcome), Duration::from_millis(secs * 1000));
        }
    }
}
