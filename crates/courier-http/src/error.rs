//! Error taxonomy.
//!
//! HTTP status codes are not errors: a 404 or 503 that the retry policy
//! gives up on is still a [`Response`](crate::Response). The one exception
//! is a retryable status that survives every retry, which fails with
//! [`RequestFailure::RetriesExhausted`] carrying the last response.

use std::path::PathBuf;
use std::time::Duration;

use crate::response::Response;

/// Failures while turning a [`RequestSpec`](crate::RequestSpec) into bytes.
/// Never retried.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("upload source not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("failed to read upload source {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("invalid header: {name:?}")]
    InvalidHeader { name: String },
}

/// Network-level failures: no response was received.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("too many redirects (max {max})")]
    TooManyRedirects { max: usize },

    #[error("transport engine error: {0}")]
    Engine(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e)
        }
    }
}

/// The raw reply could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no HTTP status line in response head")]
    NoStatusLine,

    #[error("invalid status code: {0}")]
    InvalidStatusCode(String),
}

/// Why a logical call failed after at least one physical attempt.
#[derive(Debug, thiserror::Error)]
pub enum RequestFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed response: {0}")]
    MalformedResponse(#[from] ParseError),

    #[error("retries exhausted, last status {}", .0.status())]
    RetriesExhausted(Box<Response>),
}

/// Errors returned by the client and transport.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("failed to encode request: {0}")]
    Encode(#[from] EncodeError),

    #[error("request failed after {attempts} attempt(s): {cause}")]
    RequestFailed {
        attempts: u32,
        #[source]
        cause: RequestFailure,
    },

    #[error("request cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("failed to start blocking runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl HttpError {
    /// Physical attempts made before the failure. Zero for encode and
    /// configuration errors.
    pub fn attempts(&self) -> u32 {
        match self {
            HttpError::RequestFailed { attempts, .. } | HttpError::Cancelled { attempts } => {
                *attempts
            }
            _ => 0,
        }
    }

    /// Whether the caller cancelled the call.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HttpError::Cancelled { .. })
    }

    /// Whether the underlying failure was a per-attempt timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HttpError::RequestFailed {
                cause: RequestFailure::Transport(TransportError::Timeout),
                ..
            }
        )
    }

    /// The last response, when retries ran out on a retryable status.
    pub fn response(&self) -> Option<&Response> {
        match self {
            HttpError::RequestFailed {
                cause: RequestFailure::RetriesExhausted(response),
                ..
            } => Some(response),
            _ => None,
        }
    }
}

/// How long a timed-out attempt was allowed to run; used in log messages.
pub(crate) fn describe_timeout(timeout: Duration) -> String {
    format!("timed out after {}ms", timeout.as_millis())
}
