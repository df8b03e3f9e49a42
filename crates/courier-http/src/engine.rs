//! Transport engines: perform one physical exchange and hand back the raw
//! status/header lines plus body.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{
    HeaderMap, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION,
    PROXY_AUTHORIZATION, TRANSFER_ENCODING,
};
use reqwest::{Client, ClientBuilder, StatusCode, Version};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::encode::WireRequest;
use crate::error::TransportError;
use crate::request::Method;

/// Raw reply from an engine.
///
/// `head` holds the status line and header lines of every hop in order,
/// hops separated by an empty line. Only the last status block describes
/// the final response.
#[derive(Debug, Clone, Default)]
pub struct RawReply {
    /// Status and header lines, without terminators.
    pub head: Vec<String>,
    /// Body of the final hop.
    pub body: Bytes,
}

impl RawReply {
    /// Reply from pre-split head lines.
    pub fn new(head: Vec<String>, body: impl Into<Bytes>) -> Self {
        Self {
            head,
            body: body.into(),
        }
    }

    /// Split a raw head block on newlines.
    pub fn from_text(head: &str, body: impl Into<Bytes>) -> Self {
        Self::new(
            head.lines().map(|l| l.trim_end_matches('\r').to_string()).collect(),
            body,
        )
    }
}

/// Performs a single physical HTTP exchange.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Send `request` once. Retries are the caller's business.
    async fn execute(&self, request: &WireRequest) -> Result<RawReply, TransportError>;
}

#[async_trait]
impl<E: Engine> Engine for Arc<E> {
    async fn execute(&self, request: &WireRequest) -> Result<RawReply, TransportError> {
        (**self).execute(request).await
    }
}

/// Connection-level settings for [`ReqwestEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Default `User-Agent`.
    pub user_agent: String,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// Advertise and decode gzip.
    pub gzip: bool,
    /// Follow 3xx responses carrying a `Location`.
    pub follow_redirects: bool,
    /// Hops allowed before failing.
    pub max_redirects: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("courier/{}", env!("CARGO_PKG_VERSION")),
            pool_max_idle_per_host: 10,
            gzip: true,
            follow_redirects: true,
            max_redirects: 5,
        }
    }
}

/// Engine backed by `reqwest`.
///
/// Redirects are followed here rather than by reqwest so that every hop's
/// status block ends up in the raw head.
#[derive(Debug)]
pub struct ReqwestEngine {
    config: EngineConfig,
    client: Client,
    insecure: OnceLock<Client>,
}

impl ReqwestEngine {
    /// Build the verifying client. The insecure one is built on first use.
    pub fn new(config: EngineConfig) -> Result<Self, TransportError> {
        let client = build_client(&config, true)?;
        Ok(Self {
            config,
            client,
            insecure: OnceLock::new(),
        })
    }

    /// Settings the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn client_for(&self, tls_verify: bool) -> Result<&Client, TransportError> {
        if tls_verify {
            return Ok(&self.client);
        }
        if let Some(client) = self.insecure.get() {
            return Ok(client);
        }
        let client = build_client(&self.config, false)?;
        Ok(self.insecure.get_or_init(|| client))
    }
}

fn build_client(config: &EngineConfig, tls_verify: bool) -> Result<Client, TransportError> {
    let mut builder = ClientBuilder::new()
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .redirect(reqwest::redirect::Policy::none());

    if config.gzip {
        builder = builder.gzip(true);
    }
    if !tls_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| TransportError::Engine(format!("failed to build HTTP client: {e}")))
}

#[async_trait]
impl Engine for ReqwestEngine {
    async fn execute(&self, request: &WireRequest) -> Result<RawReply, TransportError> {
        let client = self.client_for(request.tls_verify)?;

        let mut method = request.method;
        let mut url = request.uri.clone();
        let mut headers = request.headers.clone();
        let mut body = request.body.clone();
        let mut head = Vec::new();
        let mut hops = 0usize;

        loop {
            let mut builder = client
                .request(method.into(), url.clone())
                .headers(headers.clone());
            if request.version != Default::default() {
                builder = builder.version(request.version.into());
            }
            if !body.is_empty() {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await?;
            let status = response.status();

            if !head.is_empty() {
                head.push(String::new());
            }
            head.push(status_line(response.version(), status));
            head.extend(header_lines(response.headers()));

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let next = match location {
                Some(location) if self.config.follow_redirects && is_redirect(status) => {
                    let joined = url.join(&location).map_err(|e| {
                        let message = format!("invalid redirect location {location:?}: {e}");
                        TransportError::Engine(message)
                    })?;
                    Some(joined)
                }
                _ => None,
            };

            let Some(next) = next else {
                let body = response.bytes().await?;
                return Ok(RawReply { head, body });
            };

            hops += 1;
            if hops > self.config.max_redirects {
                return Err(TransportError::TooManyRedirects {
                    max: self.config.max_redirects,
                });
            }

            if rewrites_to_get(status, method) {
                method = Method::Get;
                body = Bytes::new();
                strip_content_headers(&mut headers);
            }
            if !same_origin(&url, &next) {
                strip_credentials(&mut headers);
            }
            debug!(from = %url, to = %next, status = status.as_u16(), "following redirect");
            url = next;
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// 303 always becomes GET; 301/302 do for anything but GET and HEAD.
fn rewrites_to_get(status: StatusCode, method: Method) -> bool {
    match status.as_u16() {
        303 => method != Method::Head,
        301 | 302 => !matches!(method, Method::Get | Method::Head),
        _ => false,
    }
}

fn strip_content_headers(headers: &mut HeaderMap) {
    headers.remove(CONTENT_TYPE);
    headers.remove(CONTENT_LENGTH);
    headers.remove(TRANSFER_ENCODING);
}

/// Credentials never follow a redirect to another origin.
fn strip_credentials(headers: &mut HeaderMap) {
    headers.remove(AUTHORIZATION);
    headers.remove(COOKIE);
    headers.remove(PROXY_AUTHORIZATION);
}

/// Same scheme, host and effective port.
fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}

fn status_line(version: Version, status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {} {}", version_label(version), status.as_u16(), reason),
        None => format!("{} {}", version_label(version), status.as_u16()),
    }
}

fn header_lines(headers: &HeaderMap) -> impl Iterator<Item = String> + '_ {
    headers.iter().map(|(name, value)| {
        format!("{}: {}", name.as_str(), String::from_utf8_lossy(value.as_bytes()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_head;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_status_line_format() {
        assert_eq!(status_line(Version::HTTP_11, StatusCode::OK), "HTTP/1.1 200 OK");
        assert_eq!(
            status_line(Version::HTTP_2, StatusCode::MOVED_PERMANENTLY),
            "HTTP/2 301 Moved Permanently"
        );
        assert_eq!(
            status_line(Version::HTTP_11, StatusCode::from_u16(599).unwrap()),
            "HTTP/1.1 599"
        );
    }

    #[test]
    fn test_recorded_head_parses() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut head = vec![status_line(Version::HTTP_11, StatusCode::FOUND)];
        head.push("location: /next".to_string());
        head.push(String::new());
        head.push(status_line(Version::HTTP_11, StatusCode::OK));
        head.extend(header_lines(&headers));

        let parsed = parse_head(&head).unwrap();
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.reason, "OK");
        assert_eq!(parsed.headers.first("content-type"), Some("application/json"));
        assert!(!parsed.headers.contains("location"));
    }

    #[test]
    fn test_redirect_method_rewrite() {
        assert!(rewrites_to_get(StatusCode::SEE_OTHER, Method::Post));
        assert!(rewrites_to_get(StatusCode::FOUND, Method::Post));
        assert!(!rewrites_to_get(StatusCode::FOUND, Method::Get));
        assert!(!rewrites_to_get(StatusCode::TEMPORARY_REDIRECT, Method::Post));
        assert!(!rewrites_to_get(StatusCode::PERMANENT_REDIRECT, Method::Put));
        assert!(is_redirect(StatusCode::MOVED_PERMANENTLY));
        assert!(!is_redirect(StatusCode::NOT_MODIFIED));
    }

    #[test]
    fn test_cross_origin_hop_drops_credentials() {
        let from = Url::parse("https://api.example.com/a").unwrap();
        assert!(same_origin(&from, &Url::parse("https://api.example.com:443/b").unwrap()));
        assert!(!same_origin(&from, &Url::parse("http://api.example.com/a").unwrap()));
        assert!(!same_origin(&from, &Url::parse("https://cdn.example.com/a").unwrap()));
        assert!(!same_origin(&from, &Url::parse("https://api.example.com:8443/a").unwrap()));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        headers.insert(COOKIE, HeaderValue::from_static("sid=1"));
        headers.insert(PROXY_AUTHORIZATION, HeaderValue::from_static("Basic eA=="));
        headers.insert("x-trace", HeaderValue::from_static("abc"));
        strip_credentials(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-trace").unwrap(), "abc");
    }

    #[test]
    fn test_raw_reply_from_text() {
        let reply = RawReply::from_text("HTTP/1.1 204 No Content\r\nx-id: 1\r\n", Bytes::new());
        assert_eq!(reply.head, vec!["HTTP/1.1 204 No Content", "x-id: 1"]);
    }

    #[test]
    fn test_engine_builds_insecure_client_lazily() {
        let engine = ReqwestEngine::new(EngineConfig::default()).unwrap();
        assert!(engine.insecure.get().is_none());
        engine.client_for(false).unwrap();
        assert!(engine.insecure.get().is_some());
    }
}
