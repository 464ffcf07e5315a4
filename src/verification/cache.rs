//! Local store of verification decisions.
//!
//! Decisions live in a [`StorageBackend`]. Positive decisions never change,
//! so they are also kept in an in-process LRU to spare the store a read.

use crate::error::Result;
use crate::record::VerificationDecision;
use crate::storage::{run_blocking, StorageBackend};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default capacity of the in-memory layer.
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// Verification decisions keyed by credential id.
#[derive(Clone)]
pub struct VerificationCache {
    store: Arc<dyn StorageBackend<VerificationDecision>>,
    hot: Arc<Mutex<LruCache<String, VerificationDecision>>>,
    stats: Arc<Mutex<CacheStats>>,
    io_timeout: Duration,
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Lookups answered from memory or the store.
    pub hits: u64,
    /// Lookups with no recorded decision.
    pub misses: u64,
    /// Decisions recorded.
    pub additions: u64,
    /// Store reads that failed and were treated as misses.
    pub read_errors: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl VerificationCache {
    /// Create a cache over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn StorageBackend<VerificationDecision>>,
        capacity: usize,
        io_timeout: Duration,
    ) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            hot: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(CacheStats::default())),
            io_timeout,
        }
    }

    /// Return the decision previously recorded for `id`, if any.
    ///
    /// Unreadable or corrupt store data is logged and treated as absent.
    pub async fn lookup(&self, id: &str) -> Option<VerificationDecision> {
        let remembered = self.hot.lock().get(id).cloned();
        if let Some(decision) = remembered {
            self.stats.lock().hits += 1;
            debug!("Decision for {id} found in memory");
            return Some(decision);
        }

        let store = Arc::clone(&self.store);
        let key = id.to_string();
        let result = run_blocking(self.io_timeout, "verification store read", move || {
            store.get(&key)
        })
        .await;

        match result {
            Ok(Some(decision)) => {
                self.stats.lock().hits += 1;
                debug!("Decision for {id} found in {}", self.store.describe());
                if decision.is_valid {
                    self.hot.lock().put(decision.id.clone(), decision.clone());
                }
                Some(decision)
            }
            Ok(None) => {
                self.stats.lock().misses += 1;
                None
            }
            Err(e) => {
                warn!("Reading decision for {id} failed, treating as uncached: {e}");
                let mut stats = self.stats.lock();
                stats.misses += 1;
                stats.read_errors += 1;
                None
            }
        }
    }

    /// Persist `decision`, keyed by its id.
    ///
    /// A positive decision already stored for the same id is kept; any other
    /// existing decision is replaced. Returns the decision that ends up stored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageUnavailable`] if the store cannot be written.
    pub async fn record(&self, decision: VerificationDecision) -> Result<VerificationDecision> {
        let store = Arc::clone(&self.store);
        let stored = run_blocking(self.io_timeout, "verification store write", move || {
            let key = decision.id.clone();
            store.append_or_upsert(&key, decision, &|existing: &VerificationDecision| {
                existing.is_valid
            })
        })
        .await?;

        self.stats.lock().additions += 1;
        if stored.is_valid {
            self.hot.lock().put(stored.id.clone(), stored.clone());
        }
        Ok(stored)
    }

    /// Number of decisions in the backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn stored_len(&self) -> Result<usize> {
        let store = Arc::clone(&self.store);
        run_blocking(self.io_timeout, "verification store count", move || store.len()).await
    }

    /// Description of the backing store.
    #[must_use]
    pub fn describe(&self) -> String {
        self.store.describe()
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Number of decisions held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hot.lock().len()
    }

    /// Check if the in-memory layer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hot.lock().is_empty()
    }

    /// Drop the in-memory layer. The backing store is untouched.
    pub fn clear(&self) {
        self.hot.lock().clear();
    }
}
