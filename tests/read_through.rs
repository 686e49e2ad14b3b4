//! Cache-then-network reads, invalidation, and in-flight deduplication.

mod common;

use async_trait::async_trait;
use common::*;
use content_dispatch::cache::{CacheKey, CacheKeyGenerator, CacheStore, MemoryStore};
use content_dispatch::transport::{HttpMethod, RawResponse};
use content_dispatch::{
    listener_channel, ContentClient, ListenerEvent, Operation, Origin, RequestDescriptor, RequestEnvelope,
    ResultListener, Ticket,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

fn key(path: &str) -> CacheKey {
    CacheKeyGenerator::new().generate(&RequestDescriptor::parse(path))
}

async fn seeded_store(path: &str, value: serde_json::Value) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(16));
    store
        .save(&key(path), value.to_string().as_bytes())
        .await
        .unwrap();
    store
}

fn client_on_store(
    transport: Arc<ScriptedTransport>,
    store: Arc<MemoryStore>,
    config: content_dispatch::ClientConfig,
) -> ContentClient<serde_json::Value> {
    ContentClient::builder(config)
        .transport(transport)
        .store(store)
        .session(fresh_session("A1"))
        .build()
        .unwrap()
}

async fn wait_processed(client: &ContentClient<serde_json::Value>, n: u64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.dispatcher_stats().processed < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("dispatcher processed envelopes in time");
}

#[tokio::test]
async fn test_cached_payload_then_network_payload_under_one_ticket() {
    let store = seeded_store("item/5", json!({"title": "A"})).await;
    let transport = Arc::new(ScriptedTransport::new(|_| json(200, json!({"title": "B"}))));
    let client = client_on_store(transport.clone(), store.clone(), config());

    let (listener, mut rx) = listener_channel();
    client.get("item/5", listener);

    match next_event(&mut rx).await {
        ListenerEvent::Success { payload, origin, ticket } => {
            assert_eq!(payload, vec![json!({"title": "A"})]);
            assert_eq!(origin, Origin::Cache);
            assert_eq!(ticket.as_str(), "item/5");
        }
        other => panic!("expected cached success, got {:?}", other),
    }
    match next_event(&mut rx).await {
        ListenerEvent::Success { payload, origin, ticket } => {
            assert_eq!(payload, vec![json!({"title": "B"})]);
            assert_eq!(origin, Origin::Network);
            assert_eq!(ticket.as_str(), "item/5");
        }
        other => panic!("expected network success, got {:?}", other),
    }
    assert_quiet(&mut rx).await;

    let stored = store.load(&key("item/5")).await.unwrap().unwrap();
    let stored: serde_json::Value = serde_json::from_slice(&stored).unwrap();
    assert_eq!(stored, json!([{"title": "B"}]));

    let stats = client.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.network_dispatches, 1);
    assert!(!client.is_delegated(&RequestDescriptor::parse("item/5")));

    client.shutdown().await;
}

#[tokio::test]
async fn test_cache_miss_delivers_network_phase_only() {
    let transport = Arc::new(ScriptedTransport::new(|_| json(200, json!({"title": "B"}))));
    let client = client_on_store(transport, Arc::new(MemoryStore::new(16)), config());

    let (listener, mut rx) = listener_channel();
    client.get("item/5", listener);

    assert_eq!(next_event(&mut rx).await.origin(), Some(Origin::Network));
    assert_quiet(&mut rx).await;
    assert_eq!(client.cache_stats().misses, 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_delete_passes_through_and_invalidates() {
    let store = seeded_store("item/5", json!({"title": "A"})).await;
    let transport = Arc::new(ScriptedTransport::new(|call| {
        assert_eq!(call.method, HttpMethod::Delete);
        RawResponse::new(204, Vec::new())
    }));
    let client = client_on_store(transport.clone(), store.clone(), config());

    let (listener, mut rx) = listener_channel();
    client.delete("item/5", listener);

    match next_event(&mut rx).await {
        ListenerEvent::Success { payload, origin, .. } => {
            assert!(payload.is_empty());
            assert_eq!(origin, Origin::Network);
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_quiet(&mut rx).await;
    assert!(store.load(&key("item/5")).await.unwrap().is_none());
    assert_eq!(client.cache_stats().invalidations, 1);
    assert_eq!(client.cache_stats().hits, 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_failed_write_keeps_cached_entry() {
    let store = seeded_store("item/5", json!({"title": "A"})).await;
    let transport = Arc::new(ScriptedTransport::new(|_| json(500, json!({"message": "boom"}))));
    let client = client_on_store(transport, store.clone(), config());

    let (listener, mut rx) = listener_channel();
    client.put("item/5", json!({"title": "C"}), listener);

    match next_event(&mut rx).await {
        ListenerEvent::Failure { message, .. } => assert_eq!(message, "HTTP 500: boom"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(store.load(&key("item/5")).await.unwrap().is_some());

    client.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_gets_share_one_network_phase() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(
        ScriptedTransport::new(|_| json(200, json!({"title": "B"}))).with_get_gate(gate.clone()),
    );
    let client = client_on_store(transport.clone(), Arc::new(MemoryStore::new(16)), config());
    let descriptor = RequestDescriptor::parse("item/5");

    let (first, mut first_rx) = listener_channel();
    let (second, mut second_rx) = listener_channel();
    client.get("item/5", first);
    client.get("item/5", second);
    wait_processed(&client, 2).await;

    assert!(client.is_delegated(&descriptor));
    assert_eq!(client.cache_stats().deduplicated, 1);

    gate.add_permits(1);
    assert_eq!(next_event(&mut first_rx).await.origin(), Some(Origin::Network));
    assert!(!client.is_delegated(&descriptor));
    assert_quiet(&mut second_rx).await;
    assert_eq!(transport.gets(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_piggy_backing_get_receives_cache_phase_only() {
    let gate = Arc::new(Semaphore::new(0));
    let store = seeded_store("item/5", json!({"title": "A"})).await;
    let transport = Arc::new(
        ScriptedTransport::new(|_| json(200, json!({"title": "B"}))).with_get_gate(gate.clone()),
    );
    let client = client_on_store(transport.clone(), store, config());

    let (first, mut first_rx) = listener_channel();
    let (second, mut second_rx) = listener_channel();
    client.get("item/5", first);
    client.get("item/5", second);

    assert_eq!(next_event(&mut first_rx).await.origin(), Some(Origin::Cache));
    assert_eq!(next_event(&mut second_rx).await.origin(), Some(Origin::Cache));
    wait_processed(&client, 2).await;

    gate.add_permits(1);
    assert_eq!(next_event(&mut first_rx).await.origin(), Some(Origin::Network));
    assert_quiet(&mut second_rx).await;

    client.shutdown().await;
}

#[tokio::test]
async fn test_inline_network_phase_runs_each_get() {
    let transport = Arc::new(ScriptedTransport::new(|_| json(200, json!({"title": "B"}))));
    let client = client_on_store(
        transport.clone(),
        Arc::new(MemoryStore::new(16)),
        config().with_detached_network_phase(false),
    );

    let (first, mut first_rx) = listener_channel();
    let (second, mut second_rx) = listener_channel();
    client.get("item/5", first);
    client.get("item/5", second);

    assert_eq!(next_event(&mut first_rx).await.origin(), Some(Origin::Network));
    // The second GET finds the first one's payload in the store.
    assert_eq!(next_event(&mut second_rx).await.origin(), Some(Origin::Cache));
    assert_eq!(next_event(&mut second_rx).await.origin(), Some(Origin::Network));
    assert_eq!(transport.gets(), 2);
    assert_eq!(client.cache_stats().deduplicated, 0);

    client.shutdown().await;
}

struct BrokenStore;

#[async_trait]
impl CacheStore for BrokenStore {
    async fn load(&self, _: &CacheKey) -> content_dispatch::Result<Option<Vec<u8>>> {
        Err(content_dispatch::Error::runtime_with_context("disk gone", Default::default()))
    }

    async fn save(&self, _: &CacheKey, _: &[u8]) -> content_dispatch::Result<()> {
        Err(content_dispatch::Error::runtime_with_context("disk gone", Default::default()))
    }

    async fn delete(&self, _: &CacheKey) -> content_dispatch::Result<bool> {
        Err(content_dispatch::Error::runtime_with_context("disk gone", Default::default()))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

#[tokio::test]
async fn test_store_errors_never_fail_the_request() {
    let transport = Arc::new(ScriptedTransport::new(|_| json(200, json!({"title": "B"}))));
    let client: ContentClient<serde_json::Value> = ContentClient::builder(config())
        .transport(transport)
        .store(Arc::new(BrokenStore))
        .session(fresh_session("A1"))
        .build()
        .unwrap();

    let (listener, mut rx) = listener_channel();
    client.get("item/5", listener);
    match next_event(&mut rx).await {
        ListenerEvent::Success { origin, .. } => assert_eq!(origin, Origin::Network),
        other => panic!("expected success, got {:?}", other),
    }

    let (listener, mut rx) = listener_channel();
    client.post("item", json!({"title": "C"}), listener);
    assert!(matches!(next_event(&mut rx).await, ListenerEvent::Success { .. }));

    // load + save on the GET, delete on the POST
    assert_eq!(client.cache_stats().errors, 3);

    client.shutdown().await;
}

#[tokio::test]
async fn test_request_without_listener_is_processed() {
    let transport = Arc::new(ScriptedTransport::new(|_| json(200, json!({"id": 1}))));
    let client = client_with(transport.clone(), config(), fresh_session("A1"));

    let silent: RequestEnvelope<serde_json::Value> =
        RequestEnvelope::builder(Operation::Post, RequestDescriptor::parse("item"))
            .payload(json!({"title": "quiet"}))
            .build();
    assert!(client.enqueue(silent));

    let (listener, mut rx) = listener_channel();
    client.post("item", json!({"title": "loud"}), listener);
    assert!(matches!(next_event(&mut rx).await, ListenerEvent::Success { .. }));

    wait_processed(&client, 2).await;
    assert_eq!(transport.calls().len(), 2);
    assert_eq!(client.reporter_stats().discarded, 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_write_overtaking_outstanding_get_is_not_recached() {
    let gate = Arc::new(Semaphore::new(0));
    let store = seeded_store("item/5", json!({"title": "OLD"})).await;
    let transport = Arc::new(
        ScriptedTransport::new(|call| match call.method {
            HttpMethod::Delete => RawResponse::new(204, Vec::new()),
            _ => json(200, json!({"title": "OLD"})),
        })
        .with_get_gate(gate.clone()),
    );
    let client = client_on_store(transport, store.clone(), config());

    let (reader, mut reader_rx) = listener_channel();
    let (writer, mut writer_rx) = listener_channel();
    client.get("item/5", reader);
    client.delete("item/5", writer);

    assert_eq!(next_event(&mut reader_rx).await.origin(), Some(Origin::Cache));
    assert!(matches!(next_event(&mut writer_rx).await, ListenerEvent::Success { .. }));
    assert!(store.load(&key("item/5")).await.unwrap().is_none());

    gate.add_permits(1);
    match next_event(&mut reader_rx).await {
        ListenerEvent::Success { payload, origin, .. } => {
            assert_eq!(origin, Origin::Network);
            assert_eq!(payload, vec![json!({"title": "OLD"})]);
        }
        other => panic!("expected network success, got {:?}", other),
    }
    assert!(store.load(&key("item/5")).await.unwrap().is_none());
    assert_eq!(client.cache_stats().superseded, 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_waits_for_detached_network_phase() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(
        ScriptedTransport::new(|_| json(200, json!({"title": "B"}))).with_get_gate(gate.clone()),
    );
    let client = client_on_store(transport, Arc::new(MemoryStore::new(16)), config());

    let (listener, mut rx) = listener_channel();
    client.get("item/5", listener);
    wait_processed(&client, 1).await;
    assert!(client.is_delegated(&RequestDescriptor::parse("item/5")));

    let release = gate.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        release.add_permits(1);
    });
    tokio::time::timeout(Duration::from_secs(2), client.shutdown())
        .await
        .expect("shutdown completes once the network phase finishes");

    match rx.try_recv() {
        Ok(ListenerEvent::Success { origin, .. }) => assert_eq!(origin, Origin::Network),
        other => panic!("expected delivered network success, got {:?}", other),
    }
}

/// Records every callback and panics on the success of one origin.
struct Fragile {
    panic_on: Origin,
    seen: Mutex<Vec<String>>,
}

impl Fragile {
    fn new(panic_on: Origin) -> Arc<Self> {
        Arc::new(Self {
            panic_on,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl ResultListener<serde_json::Value> for Fragile {
    fn on_success(&self, _: &Ticket, _: Vec<serde_json::Value>, origin: Origin) {
        self.seen.lock().unwrap().push(format!("success/{:?}", origin));
        if origin == self.panic_on {
            panic!("listener boom");
        }
    }

    fn on_failure(&self, _: &Ticket, message: &str, origin: Origin) {
        self.seen.lock().unwrap().push(format!("failure/{:?}: {}", origin, message));
    }
}

#[tokio::test]
async fn test_inline_listener_panic_gets_one_callback_per_phase() {
    let transport = Arc::new(ScriptedTransport::new(|_| json(200, json!({"title": "B"}))));
    let client = client_on_store(
        transport,
        Arc::new(MemoryStore::new(16)),
        config().with_detached_network_phase(false),
    );

    let listener = Fragile::new(Origin::Network);
    client.get("item/5", listener.clone());
    wait_processed(&client, 1).await;

    assert_eq!(listener.seen(), vec!["success/Network"]);
    assert_eq!(client.reporter_stats().listener_panics, 1);
    assert_eq!(client.dispatcher_stats().panics, 0);

    client.shutdown().await;
    assert_eq!(listener.seen().len(), 1);
}

#[tokio::test]
async fn test_cache_phase_listener_panic_still_runs_network_phase() {
    let store = seeded_store("item/5", json!({"title": "A"})).await;
    let transport = Arc::new(ScriptedTransport::new(|_| json(200, json!({"title": "B"}))));
    let client = client_on_store(transport.clone(), store, config());

    let listener = Fragile::new(Origin::Cache);
    client.get("item/5", listener.clone());
    wait_processed(&client, 1).await;
    let reporter_stats = client.reporter_stats();
    client.shutdown().await;

    assert_eq!(listener.seen(), vec!["success/Cache", "success/Network"]);
    assert_eq!(reporter_stats.listener_panics, 1);
    assert_eq!(transport.gets(), 1);
}

/// Serves an unreadable entry and cannot remove it.
struct CorruptStore;

#[async_trait]
impl CacheStore for CorruptStore {
    async fn load(&self, _: &CacheKey) -> content_dispatch::Result<Option<Vec<u8>>> {
        Ok(Some(b"{not json".to_vec()))
    }

    async fn save(&self, _: &CacheKey, _: &[u8]) -> content_dispatch::Result<()> {
        Ok(())
    }

    async fn delete(&self, _: &CacheKey) -> content_dispatch::Result<bool> {
        Err(content_dispatch::Error::runtime_with_context("read-only", Default::default()))
    }

    fn name(&self) -> &'static str {
        "corrupt"
    }
}

#[tokio::test]
async fn test_failed_removal_of_unreadable_entry_is_counted() {
    let transport = Arc::new(ScriptedTransport::new(|_| json(200, json!({"title": "B"}))));
    let client: ContentClient<serde_json::Value> = ContentClient::builder(config())
        .transport(transport)
        .store(Arc::new(CorruptStore))
        .session(fresh_session("A1"))
        .build()
        .unwrap();

    let (listener, mut rx) = listener_channel();
    client.get("item/5", listener);
    assert_eq!(next_event(&mut rx).await.origin(), Some(Origin::Network));
    assert_quiet(&mut rx).await;

    // decode failure plus failed removal
    let stats = client.cache_stats();
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.misses, 1);

    client.shutdown().await;
}
