//! Configuration management for the gateway
//!
//! Configuration is loaded from environment variables.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Default upstream API base URL
pub const DEFAULT_UPSTREAM_URL: &str = "https://generativelanguage.googleapis.com";

/// Redis hash holding per-key usage counts
pub const DEFAULT_USAGE_HASH_KEY: &str = "gemini:keyUsageCount";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Upstream API base URL, without trailing slash
    pub upstream_base_url: String,
    /// Comma-separated upstream API keys, exactly as configured
    pub api_keys: String,
    /// Shared secret clients must present
    pub auth_key: String,

    /// Redis connection URL; `None` keeps usage counters in memory only
    pub redis_url: Option<String>,
    /// Redis hash that stores usage counts
    pub usage_hash_key: String,
    /// Refuse to start when Redis is configured but unreachable
    pub redis_required: bool,

    /// Mount prefix stripped from inbound paths before forwarding
    pub path_prefix: Option<String>,

    /// Deadline for metadata calls such as listing models
    pub metadata_timeout: Duration,
    /// Deadline for generation calls, including the streamed body
    pub generation_timeout: Duration,

    /// Model-name substrings hidden from model listings
    pub excluded_models: Vec<String>,

    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Config {
    /// Configuration with defaults for everything but the essentials
    pub fn new(
        upstream_base_url: impl Into<String>,
        api_keys: impl Into<String>,
        auth_key: impl Into<String>,
    ) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7860,
            upstream_base_url: upstream_base_url.into().trim_end_matches('/').to_string(),
            api_keys: api_keys.into(),
            auth_key: auth_key.into(),
            redis_url: None,
            usage_hash_key: DEFAULT_USAGE_HASH_KEY.to_string(),
            redis_required: false,
            path_prefix: None,
            metadata_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(300),
            excluded_models: Vec::new(),
            json_logs: false,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let auth_key = var("AUTH_KEY").context("AUTH_KEY must be set")?;
        let mut config = Self::new(
            var("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
            var("GEMINI_API_KEYS").unwrap_or_default(),
            auth_key,
        );

        if let Some(host) = var("GATEWAY_HOST") {
            config.host = host;
        }
        if let Some(port) = var("GATEWAY_PORT") {
            config.port = port.parse().context("Invalid GATEWAY_PORT")?;
        }

        config.redis_url = var("REDIS_URL");
        if let Some(hash_key) = var("USAGE_HASH_KEY") {
            config.usage_hash_key = hash_key;
        }
        config.redis_required = var("REDIS_REQUIRED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        config.path_prefix = match var("PATH_PREFIX") {
            Some(prefix) => Some(normalize_prefix(&prefix)?),
            None => None,
        };

        if let Some(secs) = var("METADATA_TIMEOUT_SECS") {
            config.metadata_timeout =
                Duration::from_secs(secs.parse().context("Invalid METADATA_TIMEOUT_SECS")?);
        }
        if let Some(secs) = var("GENERATION_TIMEOUT_SECS") {
            config.generation_timeout =
                Duration::from_secs(secs.parse().context("Invalid GENERATION_TIMEOUT_SECS")?);
        }

        config.excluded_models = var("EXCLUDED_MODELS")
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        config.json_logs = var("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json"));

        Ok(config)
    }
}

/// Normalize a mount prefix to `/segment` form
fn normalize_prefix(prefix: &str) -> Result<String> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        bail!("PATH_PREFIX must contain at least one path segment");
    }
    Ok(format!("/{}", trimmed))
}
