use crate::cache::{CacheReadThrough, CacheStats};
use crate::client::auth::SessionHolder;
use crate::client::builder::ContentClientBuilder;
use crate::client::dispatcher::{Dispatcher, DispatcherState, DispatcherStats};
use crate::client::reporter::{ReporterStats, ResultListener, ResultReporter};
use crate::config::ClientConfig;
use crate::types::{Operation, RequestDescriptor, RequestEnvelope, Session};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Token endpoint descriptor used as the ticket of authorize requests.
const AUTHORIZE_PATH: &str = "oauth/token";

/// Client for one content API, serialising every request through one queue.
///
/// `T` is the shape responses deserialize into; use `serde_json::Value` to
/// keep payloads untyped.
pub struct ContentClient<T> {
    pub(crate) dispatcher: Dispatcher<T>,
    pub(crate) cache: Arc<CacheReadThrough<T>>,
    pub(crate) session: Arc<SessionHolder>,
    pub(crate) reporter: ResultReporter,
    pub(crate) config: ClientConfig,
}

impl<T> ContentClient<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn builder(config: ClientConfig) -> ContentClientBuilder<T> {
        ContentClientBuilder::new(config)
    }

    /// Submit a prepared envelope. See [`Dispatcher::enqueue`].
    pub fn enqueue(&self, envelope: impl Into<Option<RequestEnvelope<T>>>) -> bool {
        self.dispatcher.enqueue(envelope)
    }

    pub fn get(
        &self,
        descriptor: impl Into<RequestDescriptor>,
        listener: Arc<dyn ResultListener<T>>,
    ) -> bool {
        self.submit(Operation::Get, descriptor.into(), None, listener)
    }

    pub fn post(
        &self,
        descriptor: impl Into<RequestDescriptor>,
        payload: serde_json::Value,
        listener: Arc<dyn ResultListener<T>>,
    ) -> bool {
        self.submit(Operation::Post, descriptor.into(), Some(payload), listener)
    }

    pub fn put(
        &self,
        descriptor: impl Into<RequestDescriptor>,
        payload: serde_json::Value,
        listener: Arc<dyn ResultListener<T>>,
    ) -> bool {
        self.submit(Operation::Put, descriptor.into(), Some(payload), listener)
    }

    pub fn delete(
        &self,
        descriptor: impl Into<RequestDescriptor>,
        listener: Arc<dyn ResultListener<T>>,
    ) -> bool {
        self.submit(Operation::Delete, descriptor.into(), None, listener)
    }

    /// Run a token grant (`{"grant_type": "password", ...}`) against the
    /// token endpoint. On success the new session replaces the held one.
    pub fn authorize(&self, grant: serde_json::Value, listener: Arc<dyn ResultListener<T>>) -> bool {
        self.submit(
            Operation::Authorize,
            RequestDescriptor::parse(AUTHORIZE_PATH),
            Some(grant),
            listener,
        )
    }

    fn submit(
        &self,
        operation: Operation,
        descriptor: RequestDescriptor,
        payload: Option<serde_json::Value>,
        listener: Arc<dyn ResultListener<T>>,
    ) -> bool {
        let mut builder = RequestEnvelope::builder(operation, descriptor).listener(listener);
        if let Some(payload) = payload {
            builder = builder.payload(payload);
        }
        self.dispatcher.enqueue(builder.build())
    }

    pub fn session(&self) -> Arc<Session> {
        self.session.current()
    }

    pub fn set_session(&self, session: Session) {
        self.session.replace(session);
    }

    pub fn refresh_count(&self) -> u64 {
        self.session.refresh_count()
    }

    pub fn state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    pub fn depth(&self) -> usize {
        self.dispatcher.depth()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    pub fn reporter_stats(&self) -> ReporterStats {
        self.reporter.stats()
    }

    /// True while a GET network phase for `descriptor` is outstanding.
    pub fn is_delegated(&self, descriptor: &RequestDescriptor) -> bool {
        self.cache.delegation().contains(descriptor)
    }

    /// Drain the queue, stop the consumer, then wait for every detached
    /// network phase to deliver its result.
    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
        self.cache.drain().await;
    }
}
