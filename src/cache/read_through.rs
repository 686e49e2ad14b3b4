//! Read-through cache in front of the authenticated executor.

use super::backend::CacheStore;
use super::key::{CacheKey, CacheKeyGenerator};
use crate::client::auth::AuthGuard;
use crate::client::dispatcher::{panic_message, Handled, RequestHandler};
use crate::client::executor::decode_payload;
use crate::client::reporter::ResultReporter;
use crate::types::{ErrorKind, Operation, Origin, RequestDescriptor, RequestEnvelope, RequestResult};
use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Descriptors whose GET network phase is currently outstanding, each with
/// a flag set once a write to the same descriptor succeeded meanwhile.
#[derive(Default)]
pub struct DelegationRecord {
    inflight: Mutex<HashMap<RequestDescriptor, bool>>,
}

impl DelegationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `descriptor` unless an equal one is already in flight.
    ///
    /// Check and insert happen under one lock. The returned guard removes the
    /// entry when dropped.
    pub fn try_delegate(self: &Arc<Self>, descriptor: &RequestDescriptor) -> Option<DelegationGuard> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        if inflight.contains_key(descriptor) {
            return None;
        }
        inflight.insert(descriptor.clone(), false);
        Some(DelegationGuard {
            record: Arc::clone(self),
            descriptor: descriptor.clone(),
        })
    }

    /// Mark the outstanding network phase for `descriptor`, if any, as
    /// superseded so it does not store its payload. Returns whether one was
    /// outstanding.
    pub fn supersede(&self, descriptor: &RequestDescriptor) -> bool {
        let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        match inflight.get_mut(descriptor) {
            Some(superseded) => {
                *superseded = true;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, descriptor: &RequestDescriptor) -> bool {
        self.inflight
            .lock()
            .map(|s| s.contains_key(descriptor))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inflight.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps one descriptor recorded as delegated for as long as it lives.
pub struct DelegationGuard {
    record: Arc<DelegationRecord>,
    descriptor: RequestDescriptor,
}

impl DelegationGuard {
    /// True once a write to this descriptor succeeded after delegation.
    pub fn is_superseded(&self) -> bool {
        let inflight = self.record.inflight.lock().unwrap_or_else(|p| p.into_inner());
        inflight.get(&self.descriptor).copied().unwrap_or(false)
    }
}

impl Drop for DelegationGuard {
    fn drop(&mut self) {
        let mut inflight = self.record.inflight.lock().unwrap_or_else(|p| p.into_inner());
        inflight.remove(&self.descriptor);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub network_dispatches: u64,
    pub deduplicated: u64,
    pub invalidations: u64,
    /// Network payloads not stored because a write overtook them.
    pub superseded: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    network_dispatches: AtomicU64,
    deduplicated: AtomicU64,
    invalidations: AtomicU64,
    superseded: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            network_dispatches: self.network_dispatches.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Answers GETs from the local store first, then from the network.
///
/// A GET whose key is stored is delivered twice under one ticket: the
/// cached payload (`Origin::Cache`) and then the network payload
/// (`Origin::Network`). A GET whose equal descriptor already has a network
/// phase in flight gets the cache phase only. Other operations pass
/// through and invalidate the descriptor's key on success; a GET network
/// phase still outstanding for that descriptor then delivers its payload
/// without storing it.
pub struct CacheReadThrough<T> {
    inner: Arc<AuthGuard<T>>,
    store: Arc<dyn CacheStore>,
    keys: CacheKeyGenerator,
    delegation: Arc<DelegationRecord>,
    detach_network_phase: bool,
    phases: TaskTracker,
    stats: Arc<AtomicStats>,
}

impl<T> CacheReadThrough<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(inner: Arc<AuthGuard<T>>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            inner,
            store,
            keys: CacheKeyGenerator::new(),
            delegation: Arc::new(DelegationRecord::new()),
            detach_network_phase: true,
            phases: TaskTracker::new(),
            stats: Arc::new(AtomicStats::default()),
        }
    }

    pub fn with_key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    /// Share the record with other read-through layers on the same store.
    pub fn with_delegation_record(mut self, record: Arc<DelegationRecord>) -> Self {
        self.delegation = record;
        self
    }

    /// When `false`, the network phase runs inside `handle` and the
    /// consumer waits for it.
    pub fn with_detached_network_phase(mut self, detach: bool) -> Self {
        self.detach_network_phase = detach;
        self
    }

    pub fn delegation(&self) -> &Arc<DelegationRecord> {
        &self.delegation
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    /// Detached network phases not yet finished.
    pub fn outstanding(&self) -> usize {
        self.phases.len()
    }

    /// Wait until every detached network phase has delivered its result.
    pub async fn drain(&self) {
        self.phases.close();
        self.phases.wait().await;
        self.phases.reopen();
    }

    async fn pass_through(&self, envelope: &RequestEnvelope<T>) -> RequestResult<T> {
        let result = self.inner.execute(envelope).await;
        if result.success && envelope.operation() != Operation::Authorize {
            if self.delegation.supersede(envelope.descriptor()) {
                debug!(ticket = %envelope.ticket(), "write overtook an outstanding read");
            }
            let key = self.keys.generate(envelope.descriptor());
            match self.store.delete(&key).await {
                Ok(removed) => {
                    self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, removed, "cache entry invalidated");
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "cache invalidation failed");
                }
            }
        }
        result
    }

    /// Cache phase. Returns whether a payload was delivered.
    async fn answer_from_store(&self, envelope: &RequestEnvelope<T>, key: &CacheKey, reporter: &ResultReporter) -> bool {
        let bytes = match self.store.load(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "cache load failed, treating as miss");
                None
            }
        };
        let Some(bytes) = bytes else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match decode_payload::<T>(&bytes) {
            Ok(payload) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                reporter.report(envelope, Some(RequestResult::success(payload, Origin::Cache)));
                true
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "discarding unreadable cache entry");
                if let Err(e) = self.store.delete(key).await {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "removing unreadable cache entry failed");
                }
                false
            }
        }
    }
}

#[async_trait]
impl<T> RequestHandler<T> for CacheReadThrough<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    async fn handle(&self, envelope: &RequestEnvelope<T>, reporter: &ResultReporter) -> Handled<T> {
        if envelope.operation() != Operation::Get {
            return Handled::Completed(Some(self.pass_through(envelope).await));
        }

        let key = self.keys.generate(envelope.descriptor());
        let hit = self.answer_from_store(envelope, &key, reporter).await;

        let Some(guard) = self.delegation.try_delegate(envelope.descriptor()) else {
            self.stats.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!(
                ticket = %envelope.ticket(),
                hit,
                "network phase already in flight for descriptor, not dispatching"
            );
            return Handled::Delegated;
        };

        self.stats.network_dispatches.fetch_add(1, Ordering::Relaxed);
        let phase = NetworkPhase {
            inner: self.inner.clone(),
            store: self.store.clone(),
            key,
            envelope: envelope.clone(),
            reporter: reporter.clone(),
            guard,
            stats: self.stats.clone(),
        };
        if self.detach_network_phase {
            self.phases.spawn(phase.run());
        } else {
            phase.run().await;
        }
        Handled::Delegated
    }
}

struct NetworkPhase<T> {
    inner: Arc<AuthGuard<T>>,
    store: Arc<dyn CacheStore>,
    key: CacheKey,
    envelope: RequestEnvelope<T>,
    reporter: ResultReporter,
    guard: DelegationGuard,
    stats: Arc<AtomicStats>,
}

impl<T> NetworkPhase<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    async fn run(self) {
        let NetworkPhase {
            inner,
            store,
            key,
            envelope,
            reporter,
            guard,
            stats,
        } = self;

        let result = match AssertUnwindSafe(inner.execute(&envelope)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => RequestResult::failure(
                ErrorKind::Unknown,
                format!("network phase panicked: {}", panic_message(panic.as_ref())),
            ),
        };

        let fresh = match (result.success, result.payload.as_ref()) {
            (true, Some(payload)) => serde_json::to_vec(payload).ok(),
            _ => None,
        };
        if let Some(bytes) = fresh {
            if guard.is_superseded() {
                stats.superseded.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "descriptor written during network phase, not storing");
            } else if let Err(e) = store.save(&key, &bytes).await {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "cache update failed");
            } else if guard.is_superseded() {
                // A write succeeded while saving; its invalidation may have run first.
                stats.superseded.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = store.delete(&key).await {
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "removing overtaken cache entry failed");
                }
            }
        }

        drop(guard);
        reporter.report(&envelope, Some(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegation_is_by_value_and_released_on_drop() {
        let record = Arc::new(DelegationRecord::new());
        let a = RequestDescriptor::parse("item/5?x=1");
        let b = RequestDescriptor::new(["item", "5"]).with_query("x", "1");

        let guard = record.try_delegate(&a).expect("first delegation");
        assert!(record.contains(&b));
        assert!(record.try_delegate(&b).is_none());
        assert_eq!(record.len(), 1);

        drop(guard);
        assert!(record.is_empty());
        assert!(record.try_delegate(&b).is_some());
    }

    #[test]
    fn test_supersede_marks_only_outstanding_descriptor() {
        let record = Arc::new(DelegationRecord::new());
        let item = RequestDescriptor::parse("item/5");
        assert!(!record.supersede(&item));

        let guard = record.try_delegate(&item).expect("delegated");
        let other = record.try_delegate(&RequestDescriptor::parse("item/6")).expect("delegated");
        assert!(!guard.is_superseded());

        assert!(record.supersede(&item));
        assert!(guard.is_superseded());
        assert!(!other.is_superseded());

        drop(guard);
        let again = record.try_delegate(&item).expect("released");
        assert!(!again.is_superseded());
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }
}
