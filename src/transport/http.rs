use super::{HttpMethod, RawResponse, Transport, TransportError};
use crate::Result;
use async_trait::async_trait;
use reqwest::Proxy;
use std::env;
use std::time::Duration;
use tracing::debug;

/// `reqwest`-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build with production defaults.
    ///
    /// Env overrides:
    /// - `CONTENT_HTTP_TIMEOUT_SECS` (default 30)
    /// - `CONTENT_HTTP_POOL_MAX_IDLE_PER_HOST` (default 32)
    /// - `CONTENT_PROXY_URL`
    pub fn new() -> Result<Self> {
        let timeout_secs = env::var("CONTENT_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);
        Self::with_timeout(Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(
                env::var("CONTENT_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("CONTENT_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| crate::Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        method: HttpMethod,
        uri: &str,
        body: Option<Vec<u8>>,
        headers: &[(String, String)],
    ) -> Result<RawResponse> {
        let mut request = match method {
            HttpMethod::Get => self.client.get(uri),
            HttpMethod::Post => self.client.post(uri),
            HttpMethod::Put => self.client.put(uri),
            HttpMethod::Delete => self.client.delete(uri),
        };

        for (k, v) in headers {
            request = request.header(k, v);
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                crate::Error::Transport(TransportError::Timeout(self.timeout))
            } else {
                crate::Error::Transport(TransportError::Http(e))
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| crate::Error::Transport(TransportError::Http(e)))?;

        debug!(%method, uri, status, bytes = body.len(), "http exchange complete");
        Ok(RawResponse::new(status, body.to_vec()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
