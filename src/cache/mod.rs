//! 缓存模块：可插拔的缓存存储与先缓存后网络的读取策略。
//!
//! # Cache Module
//!
//! GET requests are answered from a local [`CacheStore`] first and then
//! refreshed from the network; both phases are delivered to the caller
//! under the same ticket, tagged with their [`Origin`](crate::types::Origin).
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheReadThrough`] | Request handler running the cache phase and the network phase |
//! | [`DelegationRecord`] | Descriptors whose GET network phase is in flight |
//! | [`CacheStore`] | Trait for byte-oriented cache backends |
//! | [`MemoryStore`] | Bounded in-memory LRU store |
//! | [`FileStore`] | One file per key under a directory |
//! | [`NullStore`] | Store that never holds anything |
//! | [`CacheKeyGenerator`] | Maps a descriptor to its [`CacheKey`] |
//!
//! ## Example
//!
//! ```rust
//! use content_dispatch::cache::{CacheKeyGenerator, CacheStore, MemoryStore};
//! use content_dispatch::types::RequestDescriptor;
//!
//! # async fn demo() -> content_dispatch::Result<()> {
//! let store = MemoryStore::new(128);
//! let key = CacheKeyGenerator::new().generate(&RequestDescriptor::parse("item/5"));
//! store.save(&key, br#"{"title":"A"}"#).await?;
//! assert!(store.load(&key).await?.is_some());
//! # Ok(())
//! # }
//! ```

mod backend;
mod key;
mod read_through;

pub use backend::{CacheStore, FileStore, MemoryStore, NullStore};
pub use key::{CacheKey, CacheKeyGenerator, DEFAULT_CACHE_SCHEME};
pub use read_through::{CacheReadThrough, CacheStats, DelegationGuard, DelegationRecord};
