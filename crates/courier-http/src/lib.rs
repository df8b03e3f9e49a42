//! Courier HTTP client core.
//!
//! A [`Client`] turns a method, URI and [`RequestOptions`] into a
//! [`RequestSpec`], which the [`Transport`] encodes once and then sends
//! through an [`Engine`] under a [`RetryPolicy`]. Each physical attempt is
//! bounded by its own timeout, reported to a `LogSink`, and may be cut
//! short by a [`CancellationToken`]. The raw reply is parsed by
//! [`parser::parse_head`], keeping only the last status block of a redirect
//! chain, and wrapped in a [`Response`] whose JSON body is decoded lazily.
//!
//! ```no_run
//! use courier_http::{Client, RequestOptions};
//!
//! # async fn run() -> Result<(), courier_http::HttpError> {
//! let client = Client::builder()
//!     .base_uri("https://api.example.com")
//!     .bearer_auth("token")
//!     .max_retries(2)
//!     .build()?;
//!
//! let response = client.get("/users/1", RequestOptions::new()).await?;
//! if let Some(name) = response.json_path("profile.name").value() {
//!     println!("{name}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod cancel;
pub mod client;
pub mod encode;
pub mod engine;
pub mod error;
pub mod parser;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;

pub use blocking::BlockingClient;
pub use cancel::{CancellationToken, CancellationWatcher};
pub use client::{Client, ClientBuilder, ClientConfig, RequestOptions};
pub use encode::{RequestEncoder, WireRequest};
pub use engine::{Engine, EngineConfig, RawReply, ReqwestEngine};
pub use error::{EncodeError, HttpError, ParseError, RequestFailure, TransportError};
pub use request::{
    BodySpec, FilePart, FormValue, HeaderList, Method, Part, ProtocolVersion, RequestSpec,
};
pub use response::{Json, Response, ResponseHeaders};
pub use retry::{
    AttemptOutcome, FixedJitter, JitterSource, RetryDecision, RetryPolicy, SeededJitter,
    ThreadRngJitter,
};
pub use transport::Transport;

pub use courier_log::sink as log_sink;
pub use courier_log::{LogEvent, LogSink, OutcomeKind, SinkError};
