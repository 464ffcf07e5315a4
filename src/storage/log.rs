//! Whole-file JSON log backend.

use super::{check_key, Access, StorageBackend, StoreRecord};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Backend that keeps every record in one JSON array file.
///
/// Each write reads the full set, mutates it in memory and replaces the file
/// through a temp file + rename. Reads and writes hold `lock` for the whole
/// cycle.
pub struct LogStore<R> {
    path: PathBuf,
    access: Access,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: StoreRecord> LogStore<R> {
    /// Create a log store at `path`. Nothing is touched on disk until the
    /// first write.
    #[must_use]
    pub fn new(path: PathBuf, access: Access) -> Self {
        Self {
            path,
            access,
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File that unreadable content is appended to before a rewrite drops
    /// it from the live log. One JSON value (or raw file body) per line.
    #[must_use]
    pub fn quarantine_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".corrupt");
        PathBuf::from(name)
    }

    fn read_raw(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::StorageUnavailable(format!(
                "reading {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Decode the file entry by entry.
    ///
    /// Only a file that is not a JSON array is `CorruptStore`. Entries that do
    /// not decode are returned in `rejected` and otherwise treated as absent.
    fn load(&self) -> Result<Loaded<R>> {
        let Some(content) = self.read_raw()? else {
            return Ok(Loaded::default());
        };

        let entries: Vec<Value> = serde_json::from_str(&content)
            .map_err(|e| Error::CorruptStore(format!("{}: {e}", self.path.display())))?;

        let mut loaded = Loaded::default();
        for (index, entry) in entries.into_iter().enumerate() {
            match R::deserialize(&entry) {
                Ok(record) => loaded.records.push(record),
                Err(e) => {
                    warn!(
                        "Skipping unreadable entry {index} in {}: {e}",
                        self.path.display()
                    );
                    loaded.rejected.push(entry);
                }
            }
        }
        Ok(loaded)
    }

    /// Load for a rewrite. Unreadable entries, or the whole body of a file
    /// that is not an array, are moved to the quarantine file first.
    fn load_for_write(&self) -> Result<Vec<R>> {
        match self.load() {
            Ok(loaded) => {
                if !loaded.rejected.is_empty() {
                    let lines = loaded
                        .rejected
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>();
                    self.quarantine(&lines)?;
                }
                Ok(loaded.records)
            }
            Err(Error::CorruptStore(msg)) => {
                warn!(
                    "Log store {} is corrupt ({msg}); moving its content to {} and starting empty",
                    self.path.display(),
                    self.quarantine_path().display()
                );
                let body = self.read_raw()?.unwrap_or_default();
                self.quarantine(&[body])?;
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn quarantine(&self, lines: &[String]) -> Result<()> {
        let aside = self.quarantine_path();
        let unavailable = |e: std::io::Error| {
            Error::StorageUnavailable(format!("quarantining to {}: {e}", aside.display()))
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&aside)
            .map_err(unavailable)?;
        for line in lines {
            writeln!(file, "{line}").map_err(unavailable)?;
        }
        file.sync_all().map_err(unavailable)?;

        warn!("Quarantined {} entries to {}", lines.len(), aside.display());
        Ok(())
    }

    fn persist(&self, records: &[R]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let unavailable = |e: &dyn std::fmt::Display| {
            Error::StorageUnavailable(format!("writing {}: {e}", self.path.display()))
        };

        fs::create_dir_all(dir).map_err(|e| unavailable(&e))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| unavailable(&e))?;
        serde_json::to_writer_pretty(&mut tmp, records).map_err(|e| unavailable(&e))?;
        tmp.flush().map_err(|e| unavailable(&e))?;
        tmp.as_file().sync_all().map_err(|e| unavailable(&e))?;
        tmp.persist(&self.path).map_err(|e| unavailable(&e.error))?;

        debug!("Rewrote {} ({} records)", self.path.display(), records.len());
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.access {
            Access::ReadWrite => Ok(()),
            Access::ReadOnly => Err(Error::StorageUnavailable(format!(
                "{} is opened read-only",
                self.path.display()
            ))),
        }
    }
}

/// Decoded content of a log file.
struct Loaded<R> {
    records: Vec<R>,
    rejected: Vec<Value>,
}

impl<R> Default for Loaded<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl<R: StoreRecord> StorageBackend<R> for LogStore<R> {
    fn get(&self, key: &str) -> Result<Option<R>> {
        let _guard = self.lock.lock();
        // Legacy files may hold several entries per key; the newest wins.
        Ok(self
            .load()?
            .records
            .into_iter()
            .rev()
            .find(|r| r.key() == key))
    }

    fn put(&self, key: &str, record: &R) -> Result<()> {
        check_key(key, record)?;
        self.ensure_writable()?;

        let _guard = self.lock.lock();
        let mut records = self.load_for_write()?;
        records.retain(|r| r.key() != key);
        records.push(record.clone());
        self.persist(&records)
    }

    fn append_or_upsert(
        &self,
        key: &str,
        record: R,
        keep_existing: &dyn Fn(&R) -> bool,
    ) -> Result<R> {
        check_key(key, &record)?;
        self.ensure_writable()?;

        let _guard = self.lock.lock();
        let mut records = self.load_for_write()?;

        if let Some(existing) = records.iter().rev().find(|r| r.key() == key) {
            if keep_existing(existing) {
                return Ok(existing.clone());
            }
        }

        records.retain(|r| r.key() != key);
        records.push(record.clone());
        self.persist(&records)?;
        Ok(record)
    }

    fn len(&self) -> Result<usize> {
        let _guard = self.lock.lock();
        let records = self.load()?.records;
        Ok(records.iter().map(|r| r.key()).collect::<HashSet<_>>().len())
    }

    fn describe(&self) -> String {
        format!("log:{}", self.path.display())
    }
}
