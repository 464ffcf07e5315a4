//! Read-through verification engine.
//!
//! This is the core verification logic for credential-verifier.

use crate::config::VerifierConfig;
use crate::error::{Error, Result};
use crate::record::{CredentialRecord, VerificationDecision};
use crate::storage::{open_backend, Access, StorageBackend};
use crate::verification::authority::AuthorityReader;
use crate::verification::cache::{CacheStats, VerificationCache};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Verifies credential ids against the authority, memoizing the outcome.
///
/// Combines:
/// 1. The local decision store, whose positive entries are final
/// 2. The authority reader, consulted on a miss or a cached negative
pub struct VerificationEngine {
    /// Recorded decisions.
    cache: VerificationCache,
    /// Issuance authority.
    authority: AuthorityReader,
    /// Recorded as `verifiedBy`.
    worker_id: String,
}

impl VerificationEngine {
    /// Create an engine from already constructed parts.
    #[must_use]
    pub fn new(
        cache: VerificationCache,
        authority: AuthorityReader,
        worker_id: impl Into<String>,
    ) -> Self {
        let worker_id = worker_id.into();
        info!(
            "Verification engine initialized (worker={worker_id}, store={}, authority={})",
            cache.describe(),
            authority.describe()
        );
        Self {
            cache,
            authority,
            worker_id,
        }
    }

    /// Open the configured stores and build an engine over them.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the local store
    /// cannot be opened.
    pub fn from_config(config: &VerifierConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn StorageBackend<VerificationDecision>> = open_backend(
            config.store.backend,
            &config.store_path(),
            &config.store.table,
            Access::ReadWrite,
            config.io_timeout(),
        )?;
        let authority_store: Arc<dyn StorageBackend<CredentialRecord>> = open_backend(
            config.authority.backend,
            &config.authority_path(),
            &config.authority.table,
            Access::ReadOnly,
            config.authority_timeout(),
        )?;

        Ok(Self::new(
            VerificationCache::new(store, config.cache_capacity, config.io_timeout()),
            AuthorityReader::new(authority_store, config.authority_timeout()),
            config.worker_id.clone(),
        ))
    }

    /// Verify the credential identified by `id`.
    ///
    /// 1. Replay a recorded positive decision (authority not consulted)
    /// 2. Otherwise ask the authority, even if a negative decision is recorded
    /// 3. Record the new decision and return what the store holds
    ///
    /// When two first calls for the same id race, both return the positive
    /// decision that reached the store first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `id` is empty, or
    /// [`Error::StorageUnavailable`] if the decision cannot be persisted.
    pub async fn verify(&self, id: &str) -> Result<VerificationDecision> {
        if id.trim().is_empty() {
            return Err(Error::InvalidRequest("credential id is required".into()));
        }

        if let Some(cached) = self.cache.lookup(id).await {
            if cached.is_valid {
                debug!("Replaying positive decision for {id}");
                return Ok(cached);
            }
            debug!(
                "Cached {} decision for {id} is not final, re-checking authority",
                cached.status
            );
        }

        let now = Utc::now();
        let decision = match self.authority.lookup(id).await {
            Some(record) => VerificationDecision::found(record, &self.worker_id, now),
            None => VerificationDecision::not_found(id, &self.worker_id, now),
        };

        let stored = self.cache.record(decision).await?;
        info!(
            "Credential {id} verified: valid={}, status={}",
            stored.is_valid, stored.status
        );
        Ok(stored)
    }

    /// Identity recorded on this engine's decisions.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Get cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of lookups issued against the authority.
    #[must_use]
    pub fn authority_lookups(&self) -> u64 {
        self.authority.lookup_count()
    }

    /// Number of decisions in the local store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn stored_decisions(&self) -> Result<usize> {
        self.cache.stored_len().await
    }
}
