//! Validation cache
//!
//! Two independently configured stores:
//!
//! - **Outcomes**, keyed by content fingerprint + validator-set fingerprint +
//!   validator id. Short-lived, because source content churns.
//! - **Model responses**, keyed by the hash of the serialised prompt.
//!   Long-lived, because they are expensive and content-addressed.
//!
//! Caching is an optimisation only: a store that fails is treated as a miss
//! on read and skipped on write, and the failure is logged.
//!
//! Invalidation is event-driven. A configuration reload calls
//! [`ValidationCache::invalidate_all`]; a truth-corpus reload calls
//! [`ValidationCache::invalidate_truth`], which clears only the outcome store.

pub mod clock;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{CacheEntry, CacheStore, MemoryStore};

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::contracts::{DocumentContext, Outcome, SemanticPrompt, SemanticResponse};

/// Fingerprint of the document content and the context it is validated in
pub fn content_fingerprint(content: &str, document: &DocumentContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(document.family.as_bytes());
    hasher.update([0u8]);
    hasher.update(document.profile.as_bytes());
    hex::encode(hasher.finalize())
}

/// Order-independent fingerprint of a validator selection
pub fn selection_fingerprint(validator_ids: &[String]) -> String {
    let mut ids: Vec<&str> = validator_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Key of the outcome store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutcomeKey(String);

impl OutcomeKey {
    pub fn new(content_hash: &str, selection_hash: &str, validator_id: &str) -> Self {
        Self(format!("{}:{}:{}", content_hash, selection_hash, validator_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Key of the model response store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromptKey(String);

impl PromptKey {
    /// Hash an already serialised prompt
    pub fn new(serialized_prompt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(serialized_prompt.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn from_prompt(prompt: &SemanticPrompt) -> Self {
        Self::new(&prompt.canonical_json())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hit/miss counters
#[derive(Debug, Default)]
struct CacheCounters {
    outcome_hits: AtomicU64,
    outcome_misses: AtomicU64,
    response_hits: AtomicU64,
    response_misses: AtomicU64,
    store_errors: AtomicU64,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub outcome_hits: u64,
    pub outcome_misses: u64,
    pub response_hits: u64,
    pub response_misses: u64,
    pub store_errors: u64,
}

/// Memoises validator outcomes and model responses
pub struct ValidationCache {
    enabled: bool,
    outcomes: Arc<dyn CacheStore<Outcome>>,
    responses: Arc<dyn CacheStore<SemanticResponse>>,
    counters: CacheCounters,
}

impl std::fmt::Debug for ValidationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationCache")
            .field("enabled", &self.enabled)
            .field("outcomes", &self.outcomes.name())
            .field("responses", &self.responses.name())
            .finish()
    }
}

impl ValidationCache {
    /// Create in-memory stores using the wall clock
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create in-memory stores using the given clock
    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let outcomes = MemoryStore::new(
            "outcomes",
            config.outcome_capacity,
            Duration::from_secs(config.outcome_ttl_secs),
            Arc::clone(&clock),
        );
        let responses = MemoryStore::new(
            "responses",
            config.response_capacity,
            Duration::from_secs(config.response_ttl_secs),
            clock,
        );

        let mut cache = Self::with_stores(Arc::new(outcomes), Arc::new(responses));
        cache.enabled = config.enabled;
        cache
    }

    /// Use caller-provided stores
    pub fn with_stores(
        outcomes: Arc<dyn CacheStore<Outcome>>,
        responses: Arc<dyn CacheStore<SemanticResponse>>,
    ) -> Self {
        Self {
            enabled: true,
            outcomes,
            responses,
            counters: CacheCounters::default(),
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        Self::new(&config)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn get(&self, key: &OutcomeKey) -> Option<Outcome> {
        if !self.enabled {
            return None;
        }
        let found = self.read(self.outcomes.as_ref(), key.as_str()).await;
        let counter = if found.is_some() {
            &self.counters.outcome_hits
        } else {
            &self.counters.outcome_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub async fn set(&self, key: &OutcomeKey, outcome: Outcome) {
        if self.enabled {
            self.write(self.outcomes.as_ref(), key.as_str(), outcome).await;
        }
    }

    pub async fn get_response(&self, key: &PromptKey) -> Option<SemanticResponse> {
        if !self.enabled {
            return None;
        }
        let found = self.read(self.responses.as_ref(), key.as_str()).await;
        let counter = if found.is_some() {
            &self.counters.response_hits
        } else {
            &self.counters.response_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub async fn set_response(&self, key: &PromptKey, response: SemanticResponse) {
        if self.enabled {
            self.write(self.responses.as_ref(), key.as_str(), response).await;
        }
    }

    /// Clear both stores (configuration reload)
    pub async fn invalidate_all(&self) {
        self.clear(self.outcomes.as_ref()).await;
        self.clear(self.responses.as_ref()).await;
        tracing::info!("Validation cache fully invalidated");
    }

    /// Clear the outcome store only (truth corpus reload)
    pub async fn invalidate_truth(&self) {
        self.clear(self.outcomes.as_ref()).await;
        tracing::info!("Outcome cache invalidated after truth reload");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            outcome_hits: self.counters.outcome_hits.load(Ordering::Relaxed),
            outcome_misses: self.counters.outcome_misses.load(Ordering::Relaxed),
            response_hits: self.counters.response_hits.load(Ordering::Relaxed),
            response_misses: self.counters.response_misses.load(Ordering::Relaxed),
            store_errors: self.counters.store_errors.load(Ordering::Relaxed),
        }
    }

    async fn read<V: Clone + Send + Sync + 'static>(
        &self,
        store: &dyn CacheStore<V>,
        key: &str,
    ) -> Option<V> {
        match store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(store = store.name(), error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn write<V: Clone + Send + Sync + 'static>(
        &self,
        store: &dyn CacheStore<V>,
        key: &str,
        value: V,
    ) {
        if let Err(e) = store.set(key, value).await {
            self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(store = store.name(), error = %e, "Cache write skipped");
        }
    }

    async fn clear<V: Clone + Send + Sync + 'static>(&self, store: &dyn CacheStore<V>) {
        if let Err(e) = store.clear().await {
            self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(store = store.name(), error = %e, "Cache invalidation failed");
        }
    }
}
