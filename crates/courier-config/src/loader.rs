//! Settings file loading and validation.

use crate::env::{vars, Environment};
use crate::types::HttpSettings;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// File name looked up in the loader's directory.
pub const CONFIG_FILE_NAME: &str = "courier.yaml";

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line_label(*line))]
    ParseError { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },

    #[error("invalid value for {var}: {value}")]
    InvalidEnvValue { var: String, value: String },
}

fn line_label(line: Option<usize>) -> String {
    line.map_or_else(|| "unknown".to_string(), |l| l.to_string())
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("env var pattern is valid")
    })
}

/// Loads [`HttpSettings`] from a directory.
pub struct SettingsLoader {
    base_path: PathBuf,
}

impl SettingsLoader {
    /// Create a loader for the given directory.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            base_path: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the settings file.
    pub fn config_path(&self) -> PathBuf {
        self.base_path.join(CONFIG_FILE_NAME)
    }

    /// Load settings from `courier.yaml`, falling back to defaults when the
    /// file is absent.
    pub fn load(&self) -> Result<HttpSettings, ConfigError> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(HttpSettings::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        self.parse(&contents)
    }

    /// Load, then apply `COURIER_*` overrides and re-validate.
    pub fn load_with_env(&self) -> Result<HttpSettings, ConfigError> {
        let mut settings = self.load()?;
        apply_env_overrides(&mut settings)?;
        validate(&settings)?;
        Ok(settings)
    }

    /// Parse settings from YAML text.
    pub fn parse(&self, contents: &str) -> Result<HttpSettings, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let settings: HttpSettings =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        validate(&settings)?;
        Ok(settings)
    }

    /// Save settings to `courier.yaml`.
    pub fn save(&self, settings: &HttpSettings) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.base_path)?;
        let yaml = serde_yaml::to_string(settings).map_err(|e| ConfigError::ParseError {
            line: None,
            message: e.to_string(),
        })?;
        std::fs::write(self.config_path(), yaml)?;
        Ok(())
    }
}

impl Default for SettingsLoader {
    /// `COURIER_CONFIG_DIR`, else the current directory.
    fn default() -> Self {
        match Environment::get(vars::COURIER_CONFIG_DIR) {
            Some(dir) => Self::new(dir),
            None => Self::new(std::env::current_dir().unwrap_or_default()),
        }
    }
}

/// Expand environment variables in the form `${VAR}` or `${VAR:-default}`.
pub fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut result = content.to_string();

    for cap in env_pattern().captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];
        let default = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_name) {
            Ok(v) => v,
            Err(_) => match default {
                Some(d) => d.to_string(),
                None => {
                    return Err(ConfigError::EnvVarNotFound {
                        var: var_name.to_string(),
                    })
                }
            },
        };

        result = result.replace(full_match, &value);
    }

    Ok(result)
}

/// Validate setting values.
pub fn validate(settings: &HttpSettings) -> Result<(), ConfigError> {
    if settings.timeout_ms == 0 {
        return Err(ConfigError::ValidationError {
            message: "timeout_ms must be greater than 0".to_string(),
        });
    }

    let jitter = settings.retry.jitter_fraction;
    if !(0.0..=1.0).contains(&jitter) {
        return Err(ConfigError::ValidationError {
            message: "retry.jitter_fraction must be between 0.0 and 1.0".to_string(),
        });
    }

    if settings.follow_redirects && settings.max_redirects == 0 {
        return Err(ConfigError::ValidationError {
            message: "max_redirects must be greater than 0 when following redirects".to_string(),
        });
    }

    if let Some(base) = &settings.base_uri {
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::ValidationError {
                message: format!("base_uri must be an http(s) URI, got {base}"),
            });
        }
    }

    Ok(())
}

/// Apply `COURIER_*` environment overrides on top of loaded settings.
pub fn apply_env_overrides(settings: &mut HttpSettings) -> Result<(), ConfigError> {
    if let Some(base) = Environment::get(vars::COURIER_BASE_URI) {
        settings.base_uri = Some(base);
    }
    if let Some(v) = parse_env(vars::COURIER_TIMEOUT_MS)? {
        settings.timeout_ms = v;
    }
    if let Some(v) = parse_env(vars::COURIER_MAX_RETRIES)? {
        settings.retry.max_retries = v;
    }
    if let Some(v) = parse_env(vars::COURIER_BASE_DELAY_MS)? {
        settings.retry.base_delay_ms = v;
    }
    if let Some(v) = Environment::get_bool(vars::COURIER_VERIFY_TLS) {
        settings.verify_tls = v;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match Environment::get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue {
                var: var.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}
