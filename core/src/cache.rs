//! Pluggable response cache.
//!
//! # Design
//! The client owns no eviction policy. A `ResponseCache` is an opaque
//! capability handed in by the caller; the dispatcher only ever asks it for
//! an entry before a GET and hands it a fresh entry after a 200. Entries keep
//! the raw response payload, so JSON and attachment responses go through the
//! same path and are parsed after reconciliation.
//!
//! Keys are the blake3 hex digest of the fully-qualified request URL.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A cached representation and the ETag it was served with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub etag: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// Called when the cache is swapped out of a client.
    fn invalidate(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Stable cache key for a fully-qualified URL.
pub fn cache_key(url: &str) -> String {
    blake3::hash(url.as_bytes()).to_hex().to_string()
}

/// Unbounded in-process cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn invalidate(&self) -> Result<(), CacheError> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_url_sensitive() {
        let a = cache_key("http://127.0.0.1:5984/db/doc");
        assert_eq!(a, cache_key("http://127.0.0.1:5984/db/doc"));
        assert_ne!(a, cache_key("http://127.0.0.1:5984/db/doc?rev=1-a"));
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn memory_cache_stores_and_invalidates() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);

        let entry = CacheEntry {
            etag: "\"1-a\"".to_string(),
            body: b"{}".to_vec(),
        };
        cache.set("k", entry.clone()).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(entry));
        assert_eq!(cache.len(), 1);

        cache.invalidate().unwrap();
        assert!(cache.is_empty());
    }
}
