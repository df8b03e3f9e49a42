//! Local HTTP server for integration tests, backed by wiremock.

use serde::Serialize;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Mock server wrapper with convenience methods.
pub struct TestHttpServer {
    server: MockServer,
}

impl TestHttpServer {
    /// Start on a random local port.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL, without a trailing slash.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Absolute URL for `path`.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Access the underlying MockServer for custom matchers.
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// GET endpoint returning JSON.
    pub async fn get_json<T: Serialize>(&self, endpoint: &str, response: &T) {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .mount(&self.server)
            .await;
    }

    /// Any-method endpoint answering `status` with a JSON error body.
    pub async fn error(&self, endpoint: &str, status: u16, message: &str) {
        Mock::given(path(endpoint))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(serde_json::json!({ "error": message })),
            )
            .mount(&self.server)
            .await;
    }

    /// Serve `responses` in order, one per request. Requests past the end
    /// get wiremock's 404.
    pub async fn sequence(&self, endpoint: &str, responses: Vec<ResponseTemplate>) {
        for (i, response) in responses.into_iter().enumerate() {
            let priority = u8::try_from(i + 1).unwrap_or(u8::MAX);
            Mock::given(path(endpoint))
                .respond_with(response)
                .up_to_n_times(1)
                .with_priority(priority)
                .mount(&self.server)
                .await;
        }
    }

    /// Number of requests received for `endpoint`.
    pub async fn hits(&self, endpoint: &str) -> usize {
        self.received_requests()
            .await
            .iter()
            .filter(|r| r.url.path() == endpoint)
            .count()
    }

    /// Assert that `endpoint` was hit exactly `times` times.
    pub async fn verify_received(&self, endpoint: &str, times: usize) {
        let count = self.hits(endpoint).await;
        assert_eq!(
            count, times,
            "Expected {} requests to {}, got {}",
            times, endpoint, count
        );
    }

    /// Every request received so far, in order.
    pub async fn received_requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }
}

/// Common response templates.
pub mod responses {
    use wiremock::ResponseTemplate;

    /// 200 with a JSON body.
    pub fn ok_json(body: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(body)
    }

    /// 429 with `Retry-After: <retry_after>`.
    pub fn rate_limited(retry_after: u32) -> ResponseTemplate {
        ResponseTemplate::new(429)
            .insert_header("Retry-After", retry_after.to_string().as_str())
            .set_body_json(serde_json::json!({ "error": "Rate limited" }))
    }

    /// 500 with a JSON error body.
    pub fn server_error() -> ResponseTemplate {
        ResponseTemplate::new(500)
            .set_body_json(serde_json::json!({ "error": "Internal server error" }))
    }

    /// `status` redirect to `location`.
    pub fn redirect(status: u16, location: &str) -> ResponseTemplate {
        ResponseTemplate::new(status).insert_header("Location", location)
    }
}
