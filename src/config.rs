//! Configuration file parser for ~/.config/feedline/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{ControllerOptions, CoordinatorConfig};
use crate::model::{Author, FeedSource, Id};

/// Environment variable that overrides `api_token` from the file.
pub const TOKEN_ENV_VAR: &str = "FEEDLINE_API_TOKEN";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Identity of the signed-in user, used for optimistic likes and comments.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserConfig {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
}

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
///
/// Custom Debug impl masks `api_token` to keep it out of logs.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL; HTTPS unless the host is loopback.
    pub base_url: String,

    /// Bearer token (alternative to the FEEDLINE_API_TOKEN env var).
    /// Env var takes precedence over config file.
    pub api_token: Option<String>,

    /// Items per page requested from the backend.
    pub page_size: u32,

    /// Minimum spacing between requests on one feed source, in milliseconds.
    pub min_request_interval_ms: u64,

    /// Rate-limit backoff unit; retry n waits `n * rate_limit_base_ms`.
    pub rate_limit_base_ms: u64,

    /// Retries after a 429 before giving up.
    pub max_rate_limit_retries: u32,

    /// Feed sources whose cache is kept while another one is shown.
    pub retained_sources: usize,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Source shown on startup.
    pub default_source: FeedSource,

    pub user: UserConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            api_token: None,
            page_size: 10,
            min_request_interval_ms: 500,
            rate_limit_base_ms: 2000,
            max_rate_limit_retries: 3,
            retained_sources: 4,
            request_timeout_secs: 30,
            default_source: FeedSource::All,
            user: UserConfig::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("page_size", &self.page_size)
            .field("min_request_interval_ms", &self.min_request_interval_ms)
            .field("rate_limit_base_ms", &self.rate_limit_base_ms)
            .field("max_rate_limit_retries", &self.max_rate_limit_retries)
            .field("retained_sources", &self.retained_sources)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("default_source", &self.default_source)
            .field("user", &self.user)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero `page_size` or `retained_sources` → `Err(ConfigError::Invalid)`
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "base_url",
                "api_token",
                "page_size",
                "min_request_interval_ms",
                "rate_limit_base_ms",
                "max_rate_limit_retries",
                "retained_sources",
                "request_timeout_secs",
                "default_source",
                "user",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), base_url = %config.base_url, "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        if self.retained_sources == 0 {
            return Err(ConfigError::Invalid(
                "retained_sources must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Bearer token, preferring the environment over the file.
    pub fn api_token(&self) -> Option<SecretString> {
        std::env::var(TOKEN_ENV_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.api_token.clone())
            .map(SecretString::from)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// The signed-in user, if `[user] id` is configured.
    pub fn current_user(&self) -> Option<Author> {
        if self.user.id.trim().is_empty() {
            return None;
        }
        Some(Author {
            id: Id::from(self.user.id.trim()),
            first_name: self.user.first_name.clone(),
            last_name: self.user.last_name.clone(),
            avatar_url: self.user.avatar_url.clone(),
        })
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            page_size: self.page_size.max(1),
            retained_sources: NonZeroUsize::new(self.retained_sources)
                .unwrap_or(NonZeroUsize::MIN),
            initial_source: self.default_source,
            coordinator: CoordinatorConfig {
                min_interval: Duration::from_millis(self.min_request_interval_ms),
                backoff_base: Duration::from_millis(self.rate_limit_base_ms),
                max_retries: self.max_rate_limit_retries,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
