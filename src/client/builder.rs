use crate::cache::{CacheKeyGenerator, CacheReadThrough, CacheStore, DelegationRecord, MemoryStore};
use crate::client::auth::{AuthGuard, SessionHolder};
use crate::client::core::ContentClient;
use crate::client::dispatcher::Dispatcher;
use crate::client::executor::{Endpoints, NetworkExecutor};
use crate::client::reporter::ResultReporter;
use crate::config::ClientConfig;
use crate::transport::{HttpTransport, Transport};
use crate::types::Session;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

/// Default number of entries kept by the in-memory store.
const DEFAULT_MEMORY_ENTRIES: usize = 1024;

/// Builder for [`ContentClient`].
///
/// Anything not supplied falls back to a production default: an
/// [`HttpTransport`] with the configured timeout and a bounded
/// [`MemoryStore`].
pub struct ContentClientBuilder<T> {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn CacheStore>>,
    session: Session,
    delegation: Option<Arc<DelegationRecord>>,
    _shape: PhantomData<fn() -> T>,
}

impl<T> ContentClientBuilder<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            store: None,
            session: Session::default(),
            delegation: None,
            _shape: PhantomData,
        }
    }

    /// Replace the network boundary (mock servers, custom stacks).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Session to start from, e.g. one persisted by the application.
    pub fn session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    /// Share in-flight GET bookkeeping with other clients on the same store.
    pub fn delegation_record(mut self, record: Arc<DelegationRecord>) -> Self {
        self.delegation = Some(record);
        self
    }

    /// Build the client. Must be called inside a tokio runtime.
    pub fn build(self) -> Result<ContentClient<T>> {
        self.config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::with_timeout(self.config.request_timeout())?),
        };
        let store: Arc<dyn CacheStore> = match self.store {
            Some(s) => s,
            None => Arc::new(MemoryStore::new(DEFAULT_MEMORY_ENTRIES)),
        };

        let endpoints = Endpoints {
            base_url: self.config.base_url.clone(),
            token_url: self.config.resolved_token_url(),
            client_id: self.config.client_id.clone(),
            client_secret: self.config.client_secret.clone(),
        };
        let session = Arc::new(SessionHolder::new(self.session));
        let guard = Arc::new(
            AuthGuard::new(NetworkExecutor::new(transport.clone(), endpoints), session.clone())
                .with_refresh_timeout(self.config.refresh_timeout())
                .with_proactive_refresh(self.config.proactive_refresh),
        );

        let mut cache = CacheReadThrough::new(guard, store.clone())
            .with_key_generator(CacheKeyGenerator::with_scheme(self.config.cache_scheme.clone()))
            .with_detached_network_phase(self.config.detach_network_phase);
        if let Some(record) = self.delegation {
            cache = cache.with_delegation_record(record);
        }
        let cache = Arc::new(cache);

        let reporter = ResultReporter::new();
        let dispatcher =
            Dispatcher::with_reporter(self.config.queue_capacity, cache.clone(), reporter.clone())?;

        info!(
            base_url = %self.config.base_url,
            transport = transport.name(),
            store = store.name(),
            capacity = dispatcher.capacity(),
            "content client ready"
        );

        Ok(ContentClient {
            dispatcher,
            cache,
            session,
            reporter,
            config: self.config,
        })
    }
}
