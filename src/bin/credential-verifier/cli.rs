//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use credential_verifier::config::VerifierConfig;
use credential_verifier::storage::BackendKind;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Verifies credential identifiers against the issuance authority.
#[derive(Parser, Debug)]
#[command(name = "credential-verifier")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root directory for service data.
    #[arg(long, env = "VERIFIER_DATA_DIR")]
    pub root_dir: Option<PathBuf>,

    /// Worker identity recorded on every decision.
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<String>,

    /// Listen address.
    #[arg(long, env = "VERIFIER_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Listening port (overrides the port of the listen address).
    #[arg(long, short, env = "PORT")]
    pub port: Option<u16>,

    /// Backend for the local verification store.
    #[arg(long, value_enum, env = "VERIFIER_STORE_BACKEND")]
    pub store_backend: Option<CliBackend>,

    /// Path of the local verification store.
    #[arg(long, env = "DB_PATH")]
    pub store_path: Option<PathBuf>,

    /// Backend used by the issuance authority.
    #[arg(long, value_enum, env = "AUTHORITY_BACKEND")]
    pub authority_backend: Option<CliBackend>,

    /// Path of the issuance authority's store.
    #[arg(long, env = "ISSUANCE_DB_PATH")]
    pub authority_path: Option<PathBuf>,

    /// Allowed CORS origin (`*` for any).
    #[arg(long, env = "CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// Log level (`RUST_LOG` takes precedence when set).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, env = "VERIFIER_JSON_LOGS")]
    pub json_logs: bool,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Storage backend CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliBackend {
    /// Whole-file JSON log.
    Log,
    /// SQLite table.
    Indexed,
}

impl Cli {
    /// Convert CLI arguments into a `VerifierConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<VerifierConfig> {
        // Start with default config or load from file
        let mut config = if let Some(ref path) = self.config {
            VerifierConfig::from_file(path)?
        } else {
            VerifierConfig::default()
        };

        // Override with CLI arguments
        if let Some(root_dir) = self.root_dir {
            config.root_dir = root_dir;
        }
        if let Some(worker_id) = self.worker_id {
            config.worker_id = worker_id;
        }
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(port) = self.port {
            config.server.listen.set_port(port);
        }
        if let Some(origin) = self.cors_origin {
            config.server.cors_origin = origin;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        // Store config
        if let Some(backend) = self.store_backend {
            config.store.backend = backend.into();
        }
        if self.store_path.is_some() {
            config.store.path = self.store_path;
        }

        // Authority config
        if let Some(backend) = self.authority_backend {
            config.authority.backend = backend.into();
        }
        if self.authority_path.is_some() {
            config.authority.path = self.authority_path;
        }

        config.validate()?;
        Ok(config)
    }
}

impl From<CliBackend> for BackendKind {
    fn from(b: CliBackend) -> Self {
        match b {
            CliBackend::Log => BackendKind::Log,
            CliBackend::Indexed => BackendKind::Indexed,
        }
    }
}
