//! Cache stores
//!
//! [`CacheStore`] is the seam for plugging an external cache service in;
//! [`MemoryStore`] is the in-process implementation: an LRU map with
//! per-entry TTL behind a single async mutex.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::clock::Clock;
use crate::error::CacheError;

/// A value with its creation time and time-to-live
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub ttl: chrono::Duration,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, created_at: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            value,
            created_at,
            ttl,
        }
    }

    /// Expired once `now - created_at > ttl`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > self.ttl
    }
}

/// Key-value store with atomic get/set semantics
///
/// Implementations must be safe for concurrent readers and writers; the
/// engine adds no locking of its own.
#[async_trait]
pub trait CacheStore<V: Clone + Send + Sync + 'static>: Send + Sync {
    /// Store name used in logs and metrics
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<V>, CacheError>;

    async fn set(&self, key: &str, value: V) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn len(&self) -> Result<usize, CacheError>;
}

/// In-process LRU store with TTL expiry
pub struct MemoryStore<V> {
    name: String,
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl<V> MemoryStore<V> {
    /// Create a store holding at most `capacity` entries
    pub fn new(name: impl Into<String>, capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));

        Self {
            name: name.into(),
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Drop every expired entry
    pub async fn prune_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = self.clock.now();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> CacheStore<V> for MemoryStore<V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        let mut entries = self.entries.lock().await;
        let now = self.clock.now();

        let expired = match entries.peek(key) {
            None => return Ok(None),
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            entries.pop(key);
            return Ok(None);
        }

        // `get` (not `peek`) so the entry becomes most recently used.
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: V) -> Result<(), CacheError> {
        let entry = CacheEntry::new(value, self.clock.now(), self.ttl);
        self.entries.lock().await.put(key.to_string(), entry);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.lock().await.len())
    }
}
