//! 传输层模块：定义网络执行边界并提供基于 reqwest 的 HTTP 实现。
//!
//! # Transport Module
//!
//! The dispatch engine never talks to the network directly. It goes through
//! the [`Transport`] trait, a single `execute(method, uri, body, headers)`
//! call returning the raw status and body. [`HttpTransport`] is the
//! production implementation; tests plug in scripted transports.

mod http;

pub use http::HttpTransport;

use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// HTTP method on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status code and undecoded body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network boundary consumed by the executor.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        method: HttpMethod,
        uri: &str,
        body: Option<Vec<u8>>,
        headers: &[(String, String)],
    ) -> Result<RawResponse>;

    fn name(&self) -> &'static str {
        "transport"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Other(String),
}
