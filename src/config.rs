//! Configuration for credential-verifier.

use crate::storage::BackendKind;
use crate::verification::DEFAULT_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Identity recorded as `verifiedBy` on every decision this process makes.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Root directory for service data.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Local verification store.
    #[serde(default)]
    pub store: StoreConfig,

    /// Issuance authority's store (read-only).
    #[serde(default)]
    pub authority: AuthorityConfig,

    /// Number of positive decisions kept in memory.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Timeout for local store reads and writes, in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Allowed CORS origin (`*` for any).
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

/// Local verification store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Storage backend.
    #[serde(default)]
    pub backend: BackendKind,

    /// Explicit path; defaults to `<root_dir>/verifications.<ext>`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Table name for the indexed backend.
    #[serde(default = "default_store_table")]
    pub table: String,
}

/// Issuance authority store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Storage backend the authority uses.
    #[serde(default)]
    pub backend: BackendKind,

    /// Explicit path; defaults to `<root_dir>/credentials.<ext>`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Table name for the indexed backend.
    #[serde(default = "default_authority_table")]
    pub table: String,

    /// Timeout for a single authority lookup, in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            root_dir: default_root_dir(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            authority: AuthorityConfig::default(),
            cache_capacity: default_cache_capacity(),
            io_timeout_ms: default_io_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cors_origin: default_cors_origin(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: None,
            table: default_store_table(),
        }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: None,
            table: default_authority_table(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_worker_id() -> String {
    "worker-1".to_string()
}

fn default_root_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "credential-verifier")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3002))
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_store_table() -> String {
    "verifications".to_string()
}

fn default_authority_table() -> String {
    "credentials".to_string()
}

const fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

const fn default_io_timeout_ms() -> u64 {
    10_000
}

const fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl VerifierConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> crate::Result<()> {
        if self.worker_id.trim().is_empty() {
            return Err(crate::Error::Config("worker_id must not be empty".into()));
        }
        if self.io_timeout_ms == 0 || self.authority.query_timeout_ms == 0 {
            return Err(crate::Error::Config("timeouts must be positive".into()));
        }
        if self.store_path() == self.authority_path() {
            return Err(crate::Error::Config(format!(
                "local store and authority store share a path: {}",
                self.store_path().display()
            )));
        }
        Ok(())
    }

    /// Path of the local verification store.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(|| {
            self.root_dir
                .join(format!("verifications.{}", self.store.backend.file_extension()))
        })
    }

    /// Path of the authority's store.
    #[must_use]
    pub fn authority_path(&self) -> PathBuf {
        self.authority.path.clone().unwrap_or_else(|| {
            self.root_dir
                .join(format!("credentials.{}", self.authority.backend.file_extension()))
        })
    }

    /// Timeout for local store operations.
    #[must_use]
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Timeout for authority lookups.
    #[must_use]
    pub fn authority_timeout(&self) -> Duration {
        Duration::from_millis(self.authority.query_timeout_ms)
    }
}
