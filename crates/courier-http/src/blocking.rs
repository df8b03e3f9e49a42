//! Synchronous call shape.
//!
//! A [`BlockingClient`] owns a current-thread tokio runtime and blocks the
//! calling thread on the async core, so retry waits are ordinary sleeps on
//! that thread. Do not use it from inside an async context.

use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

use crate::client::{Client, ClientBuilder, RequestOptions};
use crate::engine::{Engine, ReqwestEngine};
use crate::error::HttpError;
use crate::request::{Method, RequestSpec};
use crate::response::Response;

/// Blocking wrapper around [`Client`].
#[derive(Debug)]
pub struct BlockingClient<E: Engine = ReqwestEngine> {
    client: Client<E>,
    runtime: Arc<Runtime>,
}

impl<E: Engine> Clone for BlockingClient<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

fn build_runtime() -> Result<Runtime, HttpError> {
    Builder::new_current_thread()
        .enable_all()
        .thread_name("courier-blocking")
        .build()
        .map_err(HttpError::Runtime)
}

impl BlockingClient {
    /// Blocking client with default settings.
    pub fn new() -> Result<Self, HttpError> {
        ClientBuilder::new().build_blocking()
    }
}

impl<E: Engine> BlockingClient<E> {
    /// Wrap `client` with a dedicated current-thread runtime.
    pub fn from_client(client: Client<E>) -> Result<Self, HttpError> {
        Ok(Self {
            client,
            runtime: Arc::new(build_runtime()?),
        })
    }

    /// The async client this wrapper drives.
    pub fn client(&self) -> &Client<E> {
        &self.client
    }

    /// Block on [`Client::request`].
    pub fn request(
        &self,
        method: Method,
        uri: &str,
        options: RequestOptions,
    ) -> Result<Response, HttpError> {
        self.runtime
            .block_on(self.client.request(method, uri, options))
    }

    /// Block on [`Client::request_verb`].
    pub fn request_verb(
        &self,
        verb: &str,
        uri: &str,
        options: RequestOptions,
    ) -> Result<Response, HttpError> {
        self.runtime
            .block_on(self.client.request_verb(verb, uri, options))
    }

    /// `GET uri`.
    pub fn get(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Get, uri, options)
    }

    /// `POST uri`.
    pub fn post(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Post, uri, options)
    }

    /// `PUT uri`.
    pub fn put(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Put, uri, options)
    }

    /// `PATCH uri`.
    pub fn patch(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Patch, uri, options)
    }

    /// `DELETE uri`.
    pub fn delete(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Delete, uri, options)
    }

    /// `HEAD uri`.
    pub fn head(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Head, uri, options)
    }

    /// `OPTIONS uri`.
    pub fn options(&self, uri: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::Options, uri, options)
    }

    /// Block on [`Client::send`].
    pub fn send(&self, spec: &RequestSpec) -> Result<Response, HttpError> {
        self.runtime.block_on(self.client.send(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::WireRequest;
    use crate::engine::RawReply;
    use crate::error::TransportError;
    use crate::retry::FixedJitter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    /// Fails with 503 until `healthy_after` calls have been made.
    struct FlakyEngine {
        calls: AtomicU32,
        healthy_after: u32,
    }

    #[async_trait]
    impl Engine for FlakyEngine {
        async fn execute(&self, _request: &WireRequest) -> Result<RawReply, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let status = if call > self.healthy_after {
                "HTTP/1.1 200 OK"
            } else {
                "HTTP/1.1 503 Service Unavailable"
            };
            Ok(RawReply::from_text(status, "ok"))
        }
    }

    #[test]
    fn test_blocking_retries_with_real_sleep() {
        let engine = Arc::new(FlakyEngine {
            calls: AtomicU32::new(0),
            healthy_after: 2,
        });
        let client = Client::builder()
            .max_retries(2)
            .base_delay(Duration::from_millis(10))
            .jitter_source(Arc::new(FixedJitter(0.0)))
            .build_with_engine(engine.clone())
            .unwrap();
        let blocking = BlockingClient::from_client(client).unwrap();

        let start = Instant::now();
        let response = blocking.get("http://svc.test/health", RequestOptions::new()).unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), "ok");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_blocking_clones_share_runtime() {
        let engine = FlakyEngine {
            calls: AtomicU32::new(0),
            healthy_after: 0,
        };
        let client = Client::builder().build_with_engine(engine).unwrap();
        let blocking = BlockingClient::from_client(client).unwrap();
        let copy = blocking.clone();

        assert!(Arc::ptr_eq(&blocking.runtime, &copy.runtime));
        let response = copy
            .request_verb("DELETE", "http://svc.test/x", RequestOptions::new())
            .unwrap();
        assert!(response.ok());
    }
}
