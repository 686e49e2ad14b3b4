//! Cache store implementations.

use super::key::CacheKey;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Local store boundary consumed by the read-through cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;
    async fn save(&self, key: &CacheKey, value: &[u8]) -> Result<()>;
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    fn name(&self) -> &'static str;
}

fn poisoned(source: &str) -> Error {
    Error::runtime_with_context(
        "cache store lock poisoned",
        ErrorContext::new().with_source(source),
    )
}

/// Bounded in-memory LRU store.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().map_err(|_| poisoned("memory_store"))?;
        Ok(entries.get(key.as_str()).cloned())
    }

    async fn save(&self, key: &CacheKey, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned("memory_store"))?;
        entries.put(key.as_str().to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut entries = self.entries.lock().map_err(|_| poisoned("memory_store"))?;
        Ok(entries.pop(key.as_str()).is_some())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// One file per key under a directory. File names are the key digest.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.digest())
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &CacheKey, value: &[u8]) -> Result<()> {
        // write-then-rename so readers never see a partial entry
        let target = self.path_for(key);
        let tmp = target.with_extension("tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Store that never holds anything; every GET goes to the network only.
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for NullStore {
    async fn load(&self, _: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn save(&self, _: &CacheKey, _: &[u8]) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
