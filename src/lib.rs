//! # credential-verifier
//!
//! Verifies that a presented credential identifier was issued by the issuance
//! authority, and memoizes the outcome so repeated verification of the same
//! identifier is idempotent.
//!
//! ## Overview
//!
//! - [`storage`]: uniform key-value interface over a whole-file JSON log or a
//!   SQLite table
//! - [`verification`]: the authority reader, the decision cache and the
//!   read-through [`VerificationEngine`]
//! - [`http`]: `POST /verify` and `GET /health`
//! - [`service`]: wiring from [`VerifierConfig`] to a running server
//!
//! A positive decision is recorded once and replayed thereafter without
//! consulting the authority. Negative decisions (`not_found`, `revoked`) are
//! re-checked on every call.
//!
//! ## Example
//!
//! ```rust,ignore
//! use credential_verifier::{VerificationEngine, VerifierConfig};
//!
//! #[tokio::main]
//! async fn main() -> credential_verifier::Result<()> {
//!     let engine = VerificationEngine::from_config(&VerifierConfig::default())?;
//!     let decision = engine.verify("cred-123").await?;
//!     println!("valid={} status={}", decision.is_valid, decision.status);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod record;
pub mod service;
pub mod storage;
pub mod verification;

pub use config::VerifierConfig;
pub use error::{Error, Result};
pub use record::{CredentialRecord, CredentialStatus, DecisionStatus, VerificationDecision};
pub use service::{RunningService, ServiceBuilder};
pub use storage::{Access, BackendKind, StorageBackend, StoreRecord};
pub use verification::{AuthorityReader, CacheStats, VerificationCache, VerificationEngine};
