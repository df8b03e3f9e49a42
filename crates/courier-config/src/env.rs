//! Environment variable handling.

use std::env;
use thiserror::Error;

/// Environment variable errors.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("required environment variable not set: {var}")]
    NotSet { var: String },

    #[error("failed to load .env file: {0}")]
    DotenvError(#[from] dotenvy::Error),
}

/// Environment variable names.
pub mod vars {
    pub const COURIER_CONFIG_DIR: &str = "COURIER_CONFIG_DIR";
    pub const COURIER_BASE_URI: &str = "COURIER_BASE_URI";
    pub const COURIER_TIMEOUT_MS: &str = "COURIER_TIMEOUT_MS";
    pub const COURIER_MAX_RETRIES: &str = "COURIER_MAX_RETRIES";
    pub const COURIER_BASE_DELAY_MS: &str = "COURIER_BASE_DELAY_MS";
    pub const COURIER_VERIFY_TLS: &str = "COURIER_VERIFY_TLS";
}

/// Environment access.
pub struct Environment {
    _guard: (),
}

impl Environment {
    /// Load `.env` then `.env.local`; later files override earlier ones.
    /// Missing files are not an error.
    pub fn init() -> Result<Self, EnvError> {
        for file in [".env", ".env.local"] {
            match dotenvy::from_filename_override(file) {
                Ok(_) => {}
                Err(e) if e.not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Self { _guard: () })
    }

    /// Get a required string variable.
    pub fn require(var: &str) -> Result<String, EnvError> {
        env::var(var).map_err(|_| EnvError::NotSet { var: var.to_string() })
    }

    /// Get an optional string variable.
    pub fn get(var: &str) -> Option<String> {
        env::var(var).ok()
    }

    /// Get a boolean variable.
    pub fn get_bool(var: &str) -> Option<bool> {
        env::var(var)
            .ok()
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_missing() {
        let err = Environment::require("COURIER_TEST_REQUIRED_MISSING").unwrap_err();
        assert!(err.to_string().contains("COURIER_TEST_REQUIRED_MISSING"));
    }

    #[test]
    fn test_get_bool() {
        env::set_var("COURIER_TEST_BOOL", "Yes");
        assert_eq!(Environment::get_bool("COURIER_TEST_BOOL"), Some(true));
        env::set_var("COURIER_TEST_BOOL", "0");
        assert_eq!(Environment::get_bool("COURIER_TEST_BOOL"), Some(false));
        env::remove_var("COURIER_TEST_BOOL");
        assert_eq!(Environment::get_bool("COURIER_TEST_BOOL"), None);
    }
}
