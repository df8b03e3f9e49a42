//! Client facade: immutable configuration plus verb dispatch over a
//! [`Transport`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use courier_config::{AuthSettings, HttpSettings};
use courier_log::sink::{self, LogSink};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::blocking::BlockingClient;
use crate::cancel::CancellationWatcher;
use crate::encode::RequestEncoder;
use crate::engine::{Engine, EngineConfig, ReqwestEngine};
use crate::error::{EncodeError, HttpError};
use crate::request::{
    BodySpec, FilePart, FormValue, HeaderList, Method, Part, ProtocolVersion, RequestSpec,
};
use crate::response::Response;
use crate::retry::{JitterSource, RetryPolicy};
use crate::transport::Transport;

/// Settings shared by every call a [`Client`] makes.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Joined with relative request URIs.
    pub base_uri: Option<String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Sent with every request; per-request headers of the same name win.
    pub headers: HeaderList,
    /// Sent as `User-Agent` unless a header overrides it.
    pub user_agent: String,
    /// Reject invalid certificates.
    pub verify_tls: bool,
    /// Follow 3xx responses that carry a `Location`.
    pub follow_redirects: bool,
    /// Hops allowed before the call fails.
    pub max_redirects: usize,
    /// Default protocol version for requests.
    pub version: ProtocolVersion,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            base_uri: None,
            timeout: Duration::from_secs(30),
            connect_timeout: engine.connect_timeout,
            headers: HeaderList::new(),
            user_agent: engine.user_agent,
            verify_tls: true,
            follow_redirects: engine.follow_redirects,
            max_redirects: engine.max_redirects,
            version: ProtocolVersion::default(),
        }
    }
}

/// Builder for [`Client`]. Every setter consumes and returns the builder.
#[derive(Clone)]
pub struct ClientBuilder {
    config: ClientConfig,
    policy: RetryPolicy,
    sink: Arc<dyn LogSink>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Builder with default settings and the default retry policy.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            policy: RetryPolicy::default(),
            sink: sink::noop(),
        }
    }

    /// Builder preloaded from file/env settings.
    pub fn from_settings(settings: &HttpSettings) -> Self {
        let mut builder = Self::new()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .user_agent(settings.user_agent.clone())
            .verify_tls(settings.verify_tls)
            .follow_redirects(settings.follow_redirects)
            .max_redirects(settings.max_redirects)
            .max_retries(settings.retry.max_retries)
            .base_delay(Duration::from_millis(settings.retry.base_delay_ms))
            .jitter_fraction(settings.retry.jitter_fraction);

        if let Some(base) = &settings.base_uri {
            builder = builder.base_uri(base.clone());
        }
        if let Some(max) = settings.retry.max_delay_ms {
            builder = builder.max_delay(Duration::from_millis(max));
        }
        for (name, value) in &settings.headers {
            builder = builder.header(name.clone(), value.clone());
        }
        match &settings.auth {
            Some(AuthSettings::Bearer { token }) => builder.bearer_auth(token),
            Some(AuthSettings::Basic { username, password }) => {
                builder.basic_auth(username, password)
            }
            None => builder,
        }
    }

    /// Prefix for relative request URIs. Must be http or https.
    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.base_uri = Some(uri.into());
        self
    }

    /// Per-attempt timeout. Must be non-zero.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Default header. Replaces any default of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.set(name, value);
        self
    }

    /// Merge default headers, later values winning.
    pub fn headers(mut self, headers: &HeaderList) -> Self {
        self.config.headers.merge(headers);
        self
    }

    /// `Authorization: Bearer <token>` on every request.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.as_ref()))
    }

    /// `Authorization: Basic` with base64 `username:password`.
    pub fn basic_auth(self, username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        let credentials = STANDARD.encode(format!("{}:{}", username.as_ref(), password.as_ref()));
        self.header("Authorization", format!("Basic {credentials}"))
    }

    /// `User-Agent` sent with every request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Certificate verification. On by default.
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.config.verify_tls = verify;
        self
    }

    /// Whether 3xx responses are followed. On by default.
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Redirect hops allowed per attempt.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Default protocol version.
    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.config.version = version;
        self
    }

    /// Replace the whole retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// See [`RetryPolicy::with_max_retries`].
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy = self.policy.with_max_retries(max_retries);
        self
    }

    /// See [`RetryPolicy::with_base_delay`].
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.policy = self.policy.with_base_delay(base_delay);
        self
    }

    /// See [`RetryPolicy::with_jitter_fraction`].
    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.policy = self.policy.with_jitter_fraction(fraction);
        self
    }

    /// See [`RetryPolicy::with_max_delay`].
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.policy = self.policy.with_max_delay(max_delay);
        self
    }

    /// See [`RetryPolicy::with_jitter_source`].
    pub fn jitter_source(mut self, source: Arc<dyn JitterSource>) -> Self {
        self.policy = self.policy.with_jitter_source(source);
        self
    }

    /// Receives one event per physical attempt. Defaults to [`sink::noop`].
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Settings collected so far.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build a client on the reqwest engine.
    pub fn build(self) -> Result<Client, HttpError> {
        let engine = ReqwestEngine::new(EngineConfig {
            connect_timeout: self.config.connect_timeout,
            user_agent: self.config.user_agent.clone(),
            follow_redirects: self.config.follow_redirects,
            max_redirects: self.config.max_redirects,
            ..EngineConfig::default()
        })
        .map_err(|e| HttpError::Config(e.to_string()))?;
        self.build_with_engine(engine)
    }

    /// Build a client on a caller-supplied engine.
    pub fn build_with_engine<E: Engine>(self, engine: E) -> Result<Client<E>, HttpError> {
        if let Some(base) = &self.config.base_uri {
            let parsed = Url::parse(base)
                .map_err(|e| HttpError::Config(format!("invalid base URI {base:?}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(HttpError::Config(format!(
                    "base URI must be http or https, got {:?}",
                    parsed.scheme()
                )));
            }
        }
        if self.config.timeout.is_zero() {
            return Err(HttpError::Config("timeout must be greater than zero".into()));
        }

        let encoder = RequestEncoder::new(self.config.timeout, self.config.verify_tls);
        let transport = Transport::new(engine, encoder, self.policy, self.sink);
        Ok(Client {
            transport: Arc::new(transport),
            config: Arc::new(self.config),
        })
    }

    /// Build a synchronous client with its own runtime.
    pub fn build_blocking(self) -> Result<BlockingClient, HttpError> {
        BlockingClient::from_client(self.build()?)
    }
}

/// Per-call options: headers, query, body, timeout and cancellation.
#[derive(Debug, Default)]
pub struct RequestOptions {
    headers: HeaderList,
    query: Vec<(String, String)>,
    body: BodySpec,
    timeout: Option<Duration>,
    version: Option<ProtocolVersion>,
    cancel: Option<CancellationWatcher>,
    error: Option<EncodeError>,
}

impl RequestOptions {
    /// Empty options: no headers, no query, no body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Header for this call only. Wins over client defaults.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Append a query pair. Repeated names are kept.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    pub fn body(mut self, body: BodySpec) -> Self {
        self.body = body;
        self
    }

    /// JSON body. A serialization failure is reported when the call is made.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match BodySpec::json(value) {
            Ok(body) => self.body = body,
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Add a form field, switching the body to a multipart form.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FormValue>) -> Self {
        let entry = (name.into(), value.into());
        match &mut self.body {
            BodySpec::Form(fields) => fields.push(entry),
            _ => self.body = BodySpec::Form(vec![entry]),
        }
        self
    }

    /// Add a file upload field read from `path`.
    pub fn file(self, name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.field(name, FilePart::new(path))
    }

    /// Multipart body from prebuilt parts.
    pub fn multipart(mut self, parts: Vec<Part>) -> Self {
        self.body = BodySpec::RawMultipart(parts);
        self
    }

    /// `application/x-www-form-urlencoded` body.
    pub fn urlencoded<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = BodySpec::UrlEncoded(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Raw bytes, with an optional `Content-Type`.
    pub fn raw(mut self, bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        self.body = BodySpec::Raw {
            bytes: bytes.into(),
            content_type,
        };
        self
    }

    /// Per-attempt timeout for this call only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Protocol version for this call only.
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Cancel the call when the paired token fires.
    pub fn cancel(mut self, watcher: CancellationWatcher) -> Self {
        self.cancel = Some(watcher);
        self
    }
}

/// An immutable, cheaply cloneable HTTP client.
pub struct Client<E: Engine = ReqwestEngine> {
    transport: Arc<Transport<E>>,
    config: Arc<ClientConfig>,
}

impl<E: Engine> Clone for Client<E> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: Engine> std::fmt::Debug for Client<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .finish()
    }
}

impl Client {
    /// Start configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client with default settings.
    pub fn new() -> Result<Self, HttpError> {
        ClientBuilder::new().build()
    }
}

impl<E: Engine> Client<E> {
    /// Settings every call is made with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The transport running the retry loop.
    pub fn transport(&self) -> &Transport<E> {
        &self.transport
    }

    /// Resolve `uri` and merge client defaults with `options`.
    pub fn prepare(
        &self,
        method: Method,
        uri: &str,
        options: RequestOptions,
    ) -> Result<RequestSpec, HttpError> {
        if let Some(e) = options.error {
            return Err(e.into());
        }

        let uri = resolve_uri(self.config.base_uri.as_deref(), uri, &options.query)?;
        let mut headers = self.config.headers.clone();
        headers.merge(&options.headers);

        let mut spec = RequestSpec::new(method, uri)
            .headers(&headers)
            .body(options.body)
            .version(options.version.unwrap_or(self.config.version));
        if let Some(timeout) = options.timeout {
            spec = spec.timeout(timeout);
        }
        Ok(spec)
    }

    /// Resolve, encode and send one call.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        mut options: RequestOptions,
    ) -> Result<Response, HttpError> {
        let cancel = options.cancel.take();
        let spec = self.prepare(method, uri, options)?;
        self.transport.send_with_cancel(&spec, cancel).await
    }

    /// Dispatch by verb name, e.g. `"PATCH"`.
    pub async fn request_verb(
        &self,
        verb: &str,
        uri: &str,
        options: RequestOptions,
    ) -> Result<Response, HttpError> {
        let method = verb.parse::<Method>()?;
        self.request(method, uri, options).await
    }

    /// `GET uri`.
    pub async fn get(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Get, uri, options).await
    }

    /// `POST uri`.
    pub async fn post(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Post, uri, options).await
    }

    /// `PUT uri`.
    pub async fn put(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Put, uri, options).await
    }

    /// `PATCH uri`.
    pub async fn patch(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Patch, uri, options).await
    }

    /// `DELETE uri`.
    pub async fn delete(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Delete, uri, options).await
    }

    /// `HEAD uri`. The response body is empty.
    pub async fn head(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Head, uri, options).await
    }

    /// `OPTIONS uri`.
    pub async fn options(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Options, uri, options).await
    }

    /// Send a fully built spec as-is.
    pub async fn send(&self, spec: &RequestSpec) -> Result<Response, HttpError> {
        self.transport.send(spec).await
    }

    /// Send a fully built spec, stopping early if `cancel` fires.
    pub async fn send_with_cancel(
        &self,
        spec: &RequestSpec,
        cancel: CancellationWatcher,
    ) -> Result<Response, HttpError> {
        self.transport.send_with_cancel(spec, Some(cancel)).await
    }
}

/// Absolute URIs pass through; relative ones are joined onto `base` with a
/// single `/`. Query pairs are appended.
pub fn resolve_uri(
    base: Option<&str>,
    uri: &str,
    query: &[(String, String)],
) -> Result<String, EncodeError> {
    let joined = match (Url::parse(uri), base) {
        (Ok(_), _) => uri.to_string(),
        (Err(_), Some(base)) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            uri.trim_start_matches('/')
        ),
        (Err(e), None) => {
            return Err(EncodeError::InvalidUri {
                uri: uri.to_string(),
                reason: format!("{e} and no base URI configured"),
            })
        }
    };

    if query.is_empty() {
        return Ok(joined);
    }

    let mut url = Url::parse(&joined).map_err(|e| EncodeError::InvalidUri {
        uri: joined.clone(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut().extend_pairs(query);
    Ok(url.to_string())
}
