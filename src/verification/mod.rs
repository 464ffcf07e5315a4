//! Credential verification for credential-verifier.
//!
//! This module implements the read-through verification strategy:
//! 1. Replay a positive decision if one was already recorded
//! 2. Otherwise consult the issuance authority and record the outcome
//!
//! # Architecture
//!
//! ```text
//! verify(id)
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Check local store   │
//! └─────────┬───────────┘
//!           │
//!    ┌──────┴──────────────┐
//!    │                     │
//! POSITIVE        MISS / NEGATIVE
//!    │                     │
//!    ▼                     ▼
//! Replay           Query authority
//!                          │
//!                   ┌──────┴──────┐
//!                   │             │
//!                FOUND        ABSENT
//!                   │             │
//!                   ▼             ▼
//!            Record status   Record not_found
//! ```
//!
//! Positive decisions are final. Negative decisions are re-checked on every
//! call so that credentials issued later are picked up.

mod authority;
mod cache;
mod engine;

pub use authority::{AuthorityReader, DEFAULT_QUERY_TIMEOUT};
pub use cache::{CacheStats, VerificationCache, DEFAULT_CACHE_CAPACITY};
pub use engine::VerificationEngine;
