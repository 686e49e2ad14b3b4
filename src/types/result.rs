//! Request result and its failure taxonomy.

use super::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message used whenever a phase produced nothing to report.
pub const NO_RESULT_MESSAGE: &str = "no result produced";

/// Which phase of a request produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Answered from the local store; may be stale.
    Cache,
    Network,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Cache => f.write_str("cache"),
            Origin::Network => f.write_str("network"),
        }
    }
}

/// Failure category carried by an unsuccessful result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection error, timeout, or non-2xx without an auth-expiry signature.
    Transport,
    /// The access token was rejected (HTTP 401 or an expiry error body).
    AuthExpired,
    /// The response body does not match the expected shape.
    Parse,
    Unknown,
}

/// Outcome of one phase of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult<T> {
    pub success: bool,
    pub message: Option<String>,
    pub payload: Option<Vec<T>>,
    pub session: Option<Session>,
    pub kind: Option<ErrorKind>,
    pub origin: Origin,
}

impl<T> RequestResult<T> {
    pub fn success(payload: Vec<T>, origin: Origin) -> Self {
        Self {
            success: true,
            message: None,
            payload: Some(payload),
            session: None,
            kind: None,
            origin,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            payload: None,
            session: None,
            kind: Some(kind),
            origin: Origin::Network,
        }
    }

    /// Failure used when a phase produced no result at all.
    pub fn no_result() -> Self {
        Self::failure(ErrorKind::Unknown, NO_RESULT_MESSAGE)
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// A result is delivered through the success path only when it succeeded
    /// and carries a payload.
    pub fn is_deliverable_success(&self) -> bool {
        self.success && self.payload.is_some()
    }

    pub fn is_auth_expired(&self) -> bool {
        !self.success && self.kind == Some(ErrorKind::AuthExpired)
    }

    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or(NO_RESULT_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_without_payload_is_not_deliverable() {
        let mut r: RequestResult<u32> = RequestResult::success(vec![1], Origin::Network);
        assert!(r.is_deliverable_success());
        r.payload = None;
        assert!(!r.is_deliverable_success());
    }

    #[test]
    fn test_failure_defaults() {
        let r: RequestResult<u32> = RequestResult::failure(ErrorKind::AuthExpired, "expired");
        assert!(r.is_auth_expired());
        assert_eq!(r.origin, Origin::Network);
        assert_eq!(r.message_or_default(), "expired");

        let r: RequestResult<u32> = RequestResult::no_result();
        assert_eq!(r.kind, Some(ErrorKind::Unknown));
        assert_eq!(r.message_or_default(), NO_RESULT_MESSAGE);
    }
}
