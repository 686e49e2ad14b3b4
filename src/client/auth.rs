//! Bearer-token injection and the refresh-then-retry-once protocol.

use super::dispatcher::{Handled, RequestHandler};
use super::executor::NetworkExecutor;
use super::reporter::ResultReporter;
use crate::types::{ErrorKind, Operation, RequestEnvelope, RequestResult, Session};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Holds the current session.
///
/// Reads always observe a whole session; writes replace it. Refreshes are
/// serialised through `refresh_gate` so concurrent expiries share one
/// token exchange.
pub struct SessionHolder {
    current: ArcSwap<Session>,
    refresh_gate: tokio::sync::Mutex<()>,
    refreshes: AtomicU64,
}

impl SessionHolder {
    pub fn new(session: Session) -> Self {
        Self {
            current: ArcSwap::from_pointee(session),
            refresh_gate: tokio::sync::Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Arc<Session> {
        self.current.load_full()
    }

    pub fn replace(&self, session: Session) {
        self.current.store(Arc::new(session));
    }

    /// Number of completed refresh exchanges.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

impl Default for SessionHolder {
    fn default() -> Self {
        Self::new(Session::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retried,
}

/// How a refresh request was satisfied. Only an exchange performed by the
/// calling request is reported on its result.
#[derive(Debug)]
enum Refreshed {
    Exchanged(Session),
    Shared,
}

/// Decorates [`NetworkExecutor`] with the current bearer token.
///
/// An auth-expiry failure on the first attempt triggers one refresh and
/// one retry of the same envelope. A second expiry, or any failure of the
/// refresh itself, is surfaced to the caller.
pub struct AuthGuard<T> {
    executor: NetworkExecutor<T>,
    session: Arc<SessionHolder>,
    refresh_timeout: Duration,
    proactive_refresh: bool,
}

impl<T: DeserializeOwned + Send + 'static> AuthGuard<T> {
    pub fn new(executor: NetworkExecutor<T>, session: Arc<SessionHolder>) -> Self {
        Self {
            executor,
            session,
            refresh_timeout: Duration::from_secs(30),
            proactive_refresh: true,
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_proactive_refresh(mut self, enabled: bool) -> Self {
        self.proactive_refresh = enabled;
        self
    }

    pub fn session(&self) -> &Arc<SessionHolder> {
        &self.session
    }

    pub async fn execute(&self, envelope: &RequestEnvelope<T>) -> RequestResult<T> {
        if envelope.operation() == Operation::Authorize {
            let result = self.executor.execute(envelope, None).await;
            if let (true, Some(session)) = (result.success, result.session.as_ref()) {
                info!(request_id = envelope.request_id(), "session authorized");
                self.session.replace(session.clone());
            }
            return result;
        }

        let mut refreshed: Option<Session> = None;
        let held = self.session.current();
        if self.proactive_refresh && held.should_refresh() {
            debug!(
                remaining_secs = held.seconds_until_expiry(),
                "session close to expiry, refreshing before dispatch"
            );
            match self.refresh_from(&held.access_token).await {
                Ok(Refreshed::Exchanged(session)) => refreshed = Some(session),
                Ok(Refreshed::Shared) => {}
                Err(failure) => warn!(
                    reason = failure.message_or_default(),
                    "proactive refresh failed, continuing with held token"
                ),
            }
        }

        let mut attempt = Attempt::First;
        loop {
            let session = self.session.current();
            let result = self
                .executor
                .execute(envelope, Some(&session.access_token))
                .await;

            if attempt == Attempt::First && result.is_auth_expired() {
                debug!(
                    request_id = envelope.request_id(),
                    ticket = %envelope.ticket(),
                    "access token rejected, refreshing session"
                );
                match self.refresh_from(&session.access_token).await {
                    Ok(outcome) => {
                        if let Refreshed::Exchanged(session) = outcome {
                            refreshed = Some(session);
                        }
                        attempt = Attempt::Retried;
                        continue;
                    }
                    Err(failure) => {
                        return RequestResult::failure(
                            failure.kind.unwrap_or(ErrorKind::AuthExpired),
                            format!(
                                "{}; session refresh failed: {}",
                                result.message_or_default(),
                                failure.message_or_default()
                            ),
                        );
                    }
                }
            }

            return match refreshed {
                Some(session) if result.session.is_none() => result.with_session(session),
                _ => result,
            };
        }
    }

    /// Refresh unless another request already replaced `stale_access_token`.
    async fn refresh_from(&self, stale_access_token: &str) -> Result<Refreshed, RequestResult<T>> {
        let _gate = self.session.refresh_gate.lock().await;

        let current = self.session.current();
        if current.access_token != stale_access_token && current.is_authorized() {
            debug!("session already refreshed by a concurrent request");
            return Ok(Refreshed::Shared);
        }
        if current.refresh_token.is_empty() {
            return Err(RequestResult::failure(
                ErrorKind::AuthExpired,
                "no refresh token available",
            ));
        }

        let session = match tokio::time::timeout(
            self.refresh_timeout,
            self.executor.refresh(&current.refresh_token),
        )
        .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(failure)) => return Err(failure),
            Err(_) => {
                return Err(RequestResult::failure(
                    ErrorKind::Transport,
                    format!("session refresh timed out after {:?}", self.refresh_timeout),
                ))
            }
        };

        self.session.replace(session.clone());
        self.session.refreshes.fetch_add(1, Ordering::Relaxed);
        info!(
            expires_in_secs = session.seconds_until_expiry(),
            "session refreshed"
        );
        Ok(Refreshed::Exchanged(session))
    }
}

#[async_trait]
impl<T> RequestHandler<T> for AuthGuard<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn handle(&self, envelope: &RequestEnvelope<T>, _reporter: &ResultReporter) -> Handled<T> {
        Handled::Completed(Some(self.execute(envelope).await))
    }
}
