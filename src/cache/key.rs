//! Cache key generation.

use crate::types::RequestDescriptor;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_CACHE_SCHEME: &str = "content://auth";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    key: String,
}

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Hex SHA-256 of the key, safe to use as a file name.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Maps descriptors to keys under the cache's own scheme.
///
/// The descriptor's canonical form is the same one used for the network URI,
/// so `item/5` becomes `content://auth/item/5`.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    scheme: String,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self::with_scheme(DEFAULT_CACHE_SCHEME)
    }

    pub fn with_scheme(scheme: impl Into<String>) -> Self {
        let scheme: String = scheme.into();
        Self {
            scheme: scheme.trim_end_matches('/').to_string(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn generate(&self, descriptor: &RequestDescriptor) -> CacheKey {
        CacheKey::new(format!("{}/{}", self.scheme, descriptor.canonical()))
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
