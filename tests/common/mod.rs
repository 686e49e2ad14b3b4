//! Shared fixtures: a scripted transport and client construction helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use content_dispatch::transport::{HttpMethod, RawResponse, Transport};
use content_dispatch::{ClientConfig, ContentClient, ListenerEvent, Session};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

pub const BASE_URL: &str = "https://api.test/v1";
pub const TOKEN_URL: &str = "https://api.test/v1/oauth/token";

/// One request seen by the scripted transport.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: HttpMethod,
    pub uri: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Call {
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == "Authorization")
            .and_then(|(_, v)| v.strip_prefix("Bearer "))
    }

    pub fn is_token_exchange(&self) -> bool {
        self.uri == TOKEN_URL
    }
}

type Script = Box<dyn Fn(&Call) -> RawResponse + Send + Sync>;

/// Transport answering from a closure and recording every call.
///
/// GETs can be held at a gate until the test releases permits, which keeps
/// a network phase in flight for as long as the test needs.
pub struct ScriptedTransport {
    script: Script,
    calls: Mutex<Vec<Call>>,
    get_gate: Option<Arc<Semaphore>>,
    token_delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(script: impl Fn(&Call) -> RawResponse + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            get_gate: None,
            token_delay: None,
        }
    }

    pub fn with_get_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.get_gate = Some(gate);
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn token_exchanges(&self) -> usize {
        self.calls().iter().filter(|c| c.is_token_exchange()).count()
    }

    pub fn gets(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.method == HttpMethod::Get)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        method: HttpMethod,
        uri: &str,
        body: Option<Vec<u8>>,
        headers: &[(String, String)],
    ) -> content_dispatch::Result<RawResponse> {
        let call = Call {
            method,
            uri: uri.to_string(),
            body: body.map(|b| String::from_utf8_lossy(&b).into_owned()),
            headers: headers.to_vec(),
        };
        self.calls.lock().unwrap().push(call.clone());

        if method == HttpMethod::Get {
            if let Some(gate) = &self.get_gate {
                gate.acquire().await.unwrap().forget();
            }
        }
        if call.is_token_exchange() {
            if let Some(delay) = self.token_delay {
                tokio::time::sleep(delay).await;
            }
        }
        Ok((self.script)(&call))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn json(status: u16, body: serde_json::Value) -> RawResponse {
    RawResponse::new(status, body.to_string())
}

pub fn token(access: &str, refresh: &str) -> RawResponse {
    json(
        200,
        serde_json::json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 3600,
        }),
    )
}

pub fn unauthorized() -> RawResponse {
    json(401, serde_json::json!({"error": "unauthorized"}))
}

pub fn config() -> ClientConfig {
    ClientConfig::new(BASE_URL).with_credentials("app", "secret")
}

pub fn fresh_session(access: &str) -> Session {
    Session::expiring_in(access, "R1", 3600)
}

pub fn client_with(
    transport: Arc<ScriptedTransport>,
    config: ClientConfig,
    session: Session,
) -> ContentClient<serde_json::Value> {
    ContentClient::builder(config)
        .transport(transport)
        .session(session)
        .build()
        .expect("client builds")
}

/// Receive the next event or fail after two seconds.
pub async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<ListenerEvent<T>>) -> ListenerEvent<T> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within deadline")
        .expect("listener channel open")
}

/// Assert nothing more is delivered within a short window.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<ListenerEvent<T>>) {
    if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}
