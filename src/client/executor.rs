//! Turns one envelope into one HTTP exchange and a parsed result.

use crate::transport::{HttpMethod, RawResponse, Transport};
use crate::types::session::TokenResponse;
use crate::types::{ErrorKind, Operation, Origin, RequestEnvelope, RequestResult, Session};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Error body fields that identify an expired or rejected access token.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<ErrorBody>(body).ok()
    }

    fn signals_auth_expiry(&self) -> bool {
        self.error.as_deref() == Some("unauthorized")
            || self.error_description.as_deref() == Some("expired_token")
    }

    fn summary(&self) -> Option<String> {
        self.error_description
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.error.clone())
    }
}

/// HTTP 401, or an error body carrying the expiry signature.
pub fn is_auth_expiry(response: &RawResponse) -> bool {
    if response.status == 401 {
        return true;
    }
    ErrorBody::parse(&response.body)
        .map(|b| b.signals_auth_expiry())
        .unwrap_or(false)
}

/// Client credentials and endpoints used by the executor.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Performs exactly one HTTP call per invocation. No retry at this layer.
pub struct NetworkExecutor<T> {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    _shape: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> NetworkExecutor<T> {
    pub fn new(transport: Arc<dyn Transport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
            _shape: PhantomData,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Execute `envelope`, attaching `access_token` as a bearer header when given.
    pub async fn execute(
        &self,
        envelope: &RequestEnvelope<T>,
        access_token: Option<&str>,
    ) -> RequestResult<T> {
        if envelope.operation() == Operation::Authorize {
            return self.authorize(envelope).await;
        }

        let uri = envelope.descriptor().to_uri(&self.endpoints.base_url);
        let method = match envelope.operation() {
            Operation::Get => HttpMethod::Get,
            Operation::Post => HttpMethod::Post,
            Operation::Put => HttpMethod::Put,
            Operation::Delete => HttpMethod::Delete,
            Operation::Authorize => HttpMethod::Post,
        };

        let mut headers = vec![("Accept".to_string(), CONTENT_TYPE_JSON.to_string())];
        if let Some(token) = access_token.filter(|t| !t.is_empty()) {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }

        let body = if envelope.operation().has_body() {
            match envelope.payload().map(serde_json::to_vec).transpose() {
                Ok(body) => {
                    if body.is_some() {
                        headers.push(("Content-Type".to_string(), CONTENT_TYPE_JSON.to_string()));
                    }
                    body
                }
                Err(e) => {
                    return RequestResult::failure(
                        ErrorKind::Parse,
                        format!("failed to serialize request payload: {}", e),
                    )
                }
            }
        } else {
            None
        };

        debug!(
            request_id = envelope.request_id(),
            %method,
            uri = %uri,
            "executing request"
        );
        match self.transport.execute(method, &uri, body, &headers).await {
            Ok(response) => self.interpret(response),
            Err(e) => RequestResult::failure(ErrorKind::Transport, e.to_string()),
        }
    }

    /// Exchange a refresh token for a new session through the token endpoint.
    ///
    /// Failures come back as the result to surface to the caller.
    pub async fn refresh(&self, refresh_token: &str) -> std::result::Result<Session, RequestResult<T>> {
        let fields = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ];
        let response = self
            .post_form(fields)
            .await
            .map_err(|e| RequestResult::failure(ErrorKind::Transport, e.to_string()))?;
        self.parse_token_response(&response, refresh_token)
    }

    async fn authorize(&self, envelope: &RequestEnvelope<T>) -> RequestResult<T> {
        let fields = match envelope.payload() {
            None => Vec::new(),
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect(),
            Some(_) => {
                return RequestResult::failure(
                    ErrorKind::Parse,
                    "authorize payload must be a JSON object of form fields",
                )
            }
        };

        match self.post_form(fields).await {
            Ok(response) => match self.parse_token_response(&response, "") {
                Ok(session) => RequestResult::success(Vec::new(), Origin::Network).with_session(session),
                Err(failure) => failure,
            },
            Err(e) => RequestResult::failure(ErrorKind::Transport, e.to_string()),
        }
    }

    async fn post_form(&self, mut fields: Vec<(String, String)>) -> Result<RawResponse> {
        fields.push(("client_id".to_string(), self.endpoints.client_id.clone()));
        fields.push(("client_secret".to_string(), self.endpoints.client_secret.clone()));
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        let headers = vec![
            ("Accept".to_string(), CONTENT_TYPE_JSON.to_string()),
            ("Content-Type".to_string(), CONTENT_TYPE_FORM.to_string()),
        ];
        self.transport
            .execute(
                HttpMethod::Post,
                &self.endpoints.token_url,
                Some(body.into_bytes()),
                &headers,
            )
            .await
    }

    fn parse_token_response(
        &self,
        response: &RawResponse,
        previous_refresh_token: &str,
    ) -> std::result::Result<Session, RequestResult<T>> {
        if !response.is_success() {
            return Err(Self::http_failure(response));
        }
        serde_json::from_slice::<TokenResponse>(&response.body)
            .map(|t| t.into_session(previous_refresh_token))
            .map_err(|e| RequestResult::failure(ErrorKind::Parse, format!("invalid token response: {}", e)))
    }

    fn interpret(&self, response: RawResponse) -> RequestResult<T> {
        if is_auth_expiry(&response) {
            let detail = ErrorBody::parse(&response.body)
                .and_then(|b| b.summary())
                .unwrap_or_else(|| "access token expired".to_string());
            return RequestResult::failure(
                ErrorKind::AuthExpired,
                format!("HTTP {}: {}", response.status, detail),
            );
        }
        if !response.is_success() {
            return Self::http_failure(&response);
        }
        match decode_payload::<T>(&response.body) {
            Ok(payload) => RequestResult::success(payload, Origin::Network),
            Err(e) => RequestResult::failure(ErrorKind::Parse, format!("unexpected response shape: {}", e)),
        }
    }

    fn http_failure(response: &RawResponse) -> RequestResult<T> {
        let detail = ErrorBody::parse(&response.body)
            .and_then(|b| b.summary())
            .unwrap_or_else(|| String::from_utf8_lossy(&response.body).trim().to_string());
        let message = if detail.is_empty() {
            format!("HTTP {}", response.status)
        } else {
            format!("HTTP {}: {}", response.status, detail)
        };
        RequestResult::failure(ErrorKind::Transport, message)
    }
}

/// Decode a body into the result shape: an array yields every element, an
/// object yields one element, an empty body yields none.
pub fn decode_payload<T: DeserializeOwned>(body: &[u8]) -> serde_json::Result<Vec<T>> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    match serde_json::from_slice::<serde_json::Value>(body)? {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect(),
        value => Ok(vec![serde_json::from_value(value)?]),
    }
}
