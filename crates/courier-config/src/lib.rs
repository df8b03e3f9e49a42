//! Configuration for the courier HTTP client.
//!
//! Settings come from `courier.yaml` (all fields optional), with
//! `${VAR}` / `${VAR:-default}` expansion, then `COURIER_*` environment
//! overrides. The HTTP crate maps the result onto its client builder.

pub mod env;
pub mod loader;
pub mod types;

pub use env::{vars, EnvError, Environment};
pub use loader::{ConfigError, SettingsLoader, CONFIG_FILE_NAME};
pub use types::{AuthSettings, HttpSettings, RetrySettings};
