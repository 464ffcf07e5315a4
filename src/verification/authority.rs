//! Read-only access to the issuance authority's record store.
//!
//! The authority owns its store; this reader never writes to it. Lookups fail
//! open: a missing, unreadable or slow authority store yields "not found"
//! instead of an error.

use crate::error::Error;
use crate::record::CredentialRecord;
use crate::storage::{run_blocking, StorageBackend};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for a single authority lookup.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Looks up issued credentials in the authority's store.
pub struct AuthorityReader {
    store: Arc<dyn StorageBackend<CredentialRecord>>,
    query_timeout: Duration,
    lookups: AtomicU64,
}

impl AuthorityReader {
    /// Create a reader over the authority's store.
    #[must_use]
    pub fn new(store: Arc<dyn StorageBackend<CredentialRecord>>, query_timeout: Duration) -> Self {
        Self {
            store,
            query_timeout,
            lookups: AtomicU64::new(0),
        }
    }

    /// Look up the credential issued under `id`.
    ///
    /// Returns `None` if the authority has no such credential, or if its
    /// store cannot be consulted.
    pub async fn lookup(&self, id: &str) -> Option<CredentialRecord> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let store = Arc::clone(&self.store);
        let key = id.to_string();
        let result =
            run_blocking(self.query_timeout, "authority read", move || store.get(&key)).await;

        match result {
            Ok(Some(record)) => {
                debug!("Credential {id} found in authority ({:?})", record.status);
                Some(record)
            }
            Ok(None) => {
                debug!("Credential {id} not found in authority");
                None
            }
            Err(e) => {
                let err = Error::AuthorityUnavailable(e.to_string());
                warn!("{err}; reporting {id} as not found");
                None
            }
        }
    }

    /// Number of lookups issued against the authority store.
    #[must_use]
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Description of the authority store.
    #[must_use]
    pub fn describe(&self) -> String {
        self.store.describe()
    }
}
