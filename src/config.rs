//! Client configuration.
//!
//! Loaded from YAML (or built in code), then overridden from the
//! environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `CONTENT_API_BASE_URL` | `base_url` |
//! | `CONTENT_API_TOKEN_URL` | `token_url` |
//! | `CONTENT_API_CLIENT_ID` | `client_id` |
//! | `CONTENT_API_CLIENT_SECRET` | `client_secret` |
//! | `CONTENT_QUEUE_CAPACITY` | `queue_capacity` |
//! | `CONTENT_REFRESH_TIMEOUT_SECS` | `refresh_timeout_secs` |
//! | `CONTENT_HTTP_TIMEOUT_SECS` | `request_timeout_secs` |

use crate::cache::DEFAULT_CACHE_SCHEME;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

fn default_queue_capacity() -> usize {
    32
}

fn default_refresh_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_cache_scheme() -> String {
    DEFAULT_CACHE_SCHEME.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub base_url: String,
    /// Token endpoint; defaults to `<base_url>/oauth/token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_cache_scheme")]
    pub cache_scheme: String,
    #[serde(default = "default_true")]
    pub detach_network_phase: bool,
    #[serde(default = "default_true")]
    pub proactive_refresh: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_url: None,
            client_id: String::new(),
            client_secret: String::new(),
            queue_capacity: default_queue_capacity(),
            refresh_timeout_secs: default_refresh_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_scheme: default_cache_scheme(),
            detach_network_phase: true,
            proactive_refresh: true,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub async fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_yaml_str(&content)
    }

    /// Defaults overridden from the environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("CONTENT_API_BASE_URL") {
            self.base_url = v;
        }
        if let Ok(v) = env::var("CONTENT_API_TOKEN_URL") {
            self.token_url = Some(v);
        }
        if let Ok(v) = env::var("CONTENT_API_CLIENT_ID") {
            self.client_id = v;
        }
        if let Ok(v) = env::var("CONTENT_API_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Some(v) = env::var("CONTENT_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            self.queue_capacity = v;
        }
        if let Some(v) = env::var("CONTENT_REFRESH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.refresh_timeout_secs = v;
        }
        if let Some(v) = env::var("CONTENT_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.request_timeout_secs = v;
        }
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    pub fn with_credentials(mut self, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self.client_secret = client_secret.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_detached_network_phase(mut self, detach: bool) -> Self {
        self.detach_network_phase = detach;
        self
    }

    pub fn with_proactive_refresh(mut self, enabled: bool) -> Self {
        self.proactive_refresh = enabled;
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn resolved_token_url(&self) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| format!("{}/oauth/token", self.base_url.trim_end_matches('/')))
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "base_url is required",
                ErrorContext::new()
                    .with_field_path("config.base_url")
                    .with_source("client_config"),
            ));
        }
        url::Url::parse(&self.base_url).map_err(|e| {
            Error::configuration_with_context(
                "base_url is not a valid URL",
                ErrorContext::new()
                    .with_field_path("config.base_url")
                    .with_details(e.to_string())
                    .with_source("client_config"),
            )
        })?;
        if let Some(token_url) = &self.token_url {
            url::Url::parse(token_url).map_err(|e| {
                Error::validation_with_context(
                    "token_url is not a valid URL",
                    ErrorContext::new()
                        .with_field_path("config.token_url")
                        .with_details(e.to_string())
                        .with_source("client_config"),
                )
            })?;
        }
        if self.cache_scheme.trim().is_empty() {
            return Err(Error::validation_with_context(
                "cache_scheme must not be empty",
                ErrorContext::new()
                    .with_field_path("config.cache_scheme")
                    .with_source("client_config"),
            ));
        }
        Ok(())
    }
}
