//! Key-value storage shared by the verification store and the authority reader.
//!
//! Two realizations sit behind [`StorageBackend`]:
//!
//! - [`LogStore`]: the whole record set lives in one JSON file that is read,
//!   mutated and rewritten on every write. The cycle runs under a per-store
//!   mutex and the rewrite is an atomic rename, so concurrent writers cannot
//!   lose each other's updates.
//! - [`IndexedStore`]: a SQLite table keyed by record id. Per-key atomicity
//!   comes from SQLite transactions. Tables kept by other services with one
//!   column per field are read through the same interface.
//!
//! Backends are synchronous. Async callers go through [`run_blocking`], which
//! moves the call onto tokio's blocking pool and bounds it with a timeout.

mod indexed;
mod log;

pub use indexed::{IndexedStore, RowLayout};
pub use log::LogStore;

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A record that can be persisted in a [`StorageBackend`].
pub trait StoreRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Primary key of the record.
    fn key(&self) -> &str;
}

/// Uniform read/upsert interface over a durable store.
pub trait StorageBackend<R: StoreRecord>: Send + Sync {
    /// Read the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptStore`] if the persisted data cannot be decoded
    /// and [`Error::StorageUnavailable`] on I/O failure.
    fn get(&self, key: &str) -> Result<Option<R>>;

    /// Insert or replace the record under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `key` does not match the record,
    /// or [`Error::StorageUnavailable`] if the write fails.
    fn put(&self, key: &str, record: &R) -> Result<()>;

    /// Atomically insert `record` unless an existing record under `key`
    /// satisfies `keep_existing`.
    ///
    /// Returns the record that is stored under `key` once the call completes:
    /// either the kept existing record or `record` itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `key` does not match the record,
    /// or [`Error::StorageUnavailable`] if the write fails.
    fn append_or_upsert(
        &self,
        key: &str,
        record: R,
        keep_existing: &dyn Fn(&R) -> bool,
    ) -> Result<R>;

    /// Number of distinct keys in the store.
    ///
    /// # Errors
    ///
    /// Same as [`StorageBackend::get`].
    fn len(&self) -> Result<usize>;

    /// Returns true if the store holds no records.
    ///
    /// # Errors
    ///
    /// Same as [`StorageBackend::get`].
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Which realization of [`StorageBackend`] to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Whole-file JSON log.
    #[default]
    Log,
    /// SQLite table.
    Indexed,
}

impl BackendKind {
    /// Conventional file extension for the backend's data file.
    #[must_use]
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Log => "json",
            Self::Indexed => "db",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => f.write_str("log"),
            Self::Indexed => f.write_str("indexed"),
        }
    }
}

/// Whether a backend may create and modify its underlying store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Create files and tables on demand; writes allowed.
    ReadWrite,
    /// Never create or modify anything; a missing store reads as empty.
    ReadOnly,
}

/// Open a backend of the given kind.
///
/// `table` is only used by the indexed backend.
///
/// # Errors
///
/// Returns an error if the table name is invalid or a read-write store cannot
/// be created.
pub fn open_backend<R: StoreRecord>(
    kind: BackendKind,
    path: &Path,
    table: &str,
    access: Access,
    busy_timeout: Duration,
) -> Result<Arc<dyn StorageBackend<R>>> {
    let backend: Arc<dyn StorageBackend<R>> = match kind {
        BackendKind::Log => Arc::new(LogStore::<R>::new(path.to_path_buf(), access)),
        BackendKind::Indexed => Arc::new(IndexedStore::<R>::open(
            path.to_path_buf(),
            table,
            access,
            busy_timeout,
        )?),
    };
    Ok(backend)
}

/// Run a blocking storage call on the blocking pool, bounded by `timeout`.
///
/// A timed-out call is abandoned by the caller. The backend call itself still
/// runs to completion, and backend writes are all-or-nothing.
///
/// # Errors
///
/// Returns the backend's error, or [`Error::StorageUnavailable`] if the call
/// times out or the blocking task fails.
pub async fn run_blocking<T, F>(timeout: Duration, what: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::StorageUnavailable(format!("{what} task failed: {e}"))),
        Err(_) => Err(Error::StorageUnavailable(format!(
            "{what} timed out after {timeout:?}"
        ))),
    }
}

pub(crate) fn check_key<R: StoreRecord>(key: &str, record: &R) -> Result<()> {
    if key == record.key() {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!(
            "store key {key:?} does not match record id {:?}",
            record.key()
        )))
    }
}
