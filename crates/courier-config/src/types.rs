//! Configuration types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Prefix for relative request URIs.
    pub base_uri: Option<String>,
    /// Per-attempt timeout (ms).
    pub timeout_ms: u64,
    /// Connection establishment timeout (ms).
    pub connect_timeout_ms: u64,
    /// Default headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// User agent string.
    pub user_agent: String,
    /// Verify TLS certificates.
    pub verify_tls: bool,
    /// Follow 3xx responses.
    pub follow_redirects: bool,
    /// Maximum redirect hops per attempt.
    pub max_redirects: usize,
    /// Retry behaviour.
    pub retry: RetrySettings,
    /// Authentication header injection.
    pub auth: Option<AuthSettings>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            base_uri: None,
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            headers: BTreeMap::new(),
            user_agent: format!("courier/{}", env!("CARGO_PKG_VERSION")),
            verify_tls: true,
            follow_redirects: true,
            max_redirects: 5,
            retry: RetrySettings::default(),
            auth: None,
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Backoff base (ms); attempt `n` waits `base * 2^n`.
    pub base_delay_ms: u64,
    /// Upper bound of the random jitter, as a fraction of the computed delay.
    pub jitter_fraction: f64,
    /// Cap on the computed backoff (ms).
    pub max_delay_ms: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            jitter_fraction: 0.1,
            max_delay_ms: None,
        }
    }
}

/// Authentication injected as an `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthSettings {
    Bearer { token: String },
    Basic { username: String, password: String },
}
