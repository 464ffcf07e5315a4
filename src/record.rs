//! Persisted record types.
//!
//! [`CredentialRecord`] is owned by the issuance authority and is only ever
//! read here. [`VerificationDecision`] is written by the verification engine
//! and never mutated once a positive decision exists for its id.

use crate::storage::StoreRecord;
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;

/// Issuer reported when the authority record does not name one.
pub const UNKNOWN_ISSUER: &str = "Unknown";

/// Reason attached to decisions for ids the authority has never issued.
pub const REASON_NOT_FOUND: &str = "Credential not found";

/// Reason attached to decisions for revoked credentials.
pub const REASON_REVOKED: &str = "Credential revoked";

/// Worker recorded on decisions persisted without a `verifiedBy` field.
pub const UNKNOWN_WORKER: &str = "unknown";

/// Status of a credential as recorded by the issuance authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    /// Issued and in good standing.
    #[default]
    Valid,
    /// Withdrawn by the issuer.
    Revoked,
    /// Temporarily suspended by the issuer.
    Suspended,
}

/// A credential as issued by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// Unique credential identifier.
    pub id: String,
    /// Issuer name.
    #[serde(default = "default_issuer", deserialize_with = "issuer_or_unknown")]
    pub issuer: String,
    /// When the credential was issued, if the authority recorded it.
    #[serde(
        default,
        alias = "issued_at",
        deserialize_with = "timestamp_or_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub issued_at: Option<DateTime<Utc>>,
    /// Authority-side status.
    #[serde(default, deserialize_with = "status_or_valid")]
    pub status: CredentialStatus,
}

impl CredentialRecord {
    /// Create a valid credential record with no issuance timestamp.
    #[must_use]
    pub fn new(id: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            issuer: issuer.into(),
            issued_at: None,
            status: CredentialStatus::Valid,
        }
    }

    /// Set the authority status.
    #[must_use]
    pub fn with_status(mut self, status: CredentialStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the issuance timestamp.
    #[must_use]
    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = Some(issued_at);
        self
    }
}

impl StoreRecord for CredentialRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

fn default_issuer() -> String {
    UNKNOWN_ISSUER.to_string()
}

fn issuer_or_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let issuer = Option::<String>::deserialize(deserializer)?;
    Ok(issuer
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default_issuer))
}

fn status_or_valid<'de, D>(deserializer: D) -> Result<CredentialStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<CredentialStatus>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 text or epoch milliseconds.
fn timestamp_or_millis<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stamp {
        Text(DateTime<Utc>),
        Millis(i64),
    }

    match Option::<Stamp>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Stamp::Text(at)) => Ok(Some(at)),
        Some(Stamp::Millis(ms)) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {ms}"))),
    }
}

/// Status carried by a verification decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Authority reports the credential valid.
    Valid,
    /// Authority reports the credential revoked.
    Revoked,
    /// Authority reports the credential suspended.
    Suspended,
    /// Authority has no record of the credential.
    NotFound,
}

impl DecisionStatus {
    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Revoked => "revoked",
            Self::Suspended => "suspended",
            Self::NotFound => "not_found",
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CredentialStatus> for DecisionStatus {
    fn from(status: CredentialStatus) -> Self {
        match status {
            CredentialStatus::Valid => Self::Valid,
            CredentialStatus::Revoked => Self::Revoked,
            CredentialStatus::Suspended => Self::Suspended,
        }
    }
}

/// Outcome of verifying one credential id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredDecision")]
pub struct VerificationDecision {
    /// Credential identifier (same key space as [`CredentialRecord::id`]).
    pub id: String,
    /// Whether the credential is considered valid.
    pub is_valid: bool,
    /// When the decision was made.
    pub verified_at: DateTime<Utc>,
    /// Identity of the worker that made the decision.
    pub verified_by: String,
    /// Authority status, or `not_found`.
    pub status: DecisionStatus,
    /// Issuer, when the authority had a record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Issuance timestamp, when the authority recorded one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    /// Human-readable explanation, present only for negative decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Persisted form of a decision.
///
/// Older log files carry neither `verifiedBy` nor, for negative entries,
/// `status`, and may mark a revoked credential `isValid: true`. Decoding
/// fills the gaps and recomputes validity from the status.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDecision {
    id: String,
    is_valid: bool,
    verified_at: DateTime<Utc>,
    #[serde(default = "unknown_worker")]
    verified_by: String,
    #[serde(default)]
    status: Option<DecisionStatus>,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default, deserialize_with = "timestamp_or_millis")]
    issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    reason: Option<String>,
}

fn unknown_worker() -> String {
    UNKNOWN_WORKER.to_string()
}

impl From<StoredDecision> for VerificationDecision {
    fn from(stored: StoredDecision) -> Self {
        let status = stored.status.unwrap_or(if stored.is_valid {
            DecisionStatus::Valid
        } else if stored.reason.as_deref() == Some(REASON_REVOKED) {
            DecisionStatus::Revoked
        } else {
            DecisionStatus::NotFound
        });
        let is_valid = matches!(status, DecisionStatus::Valid | DecisionStatus::Suspended);
        let reason = if is_valid {
            None
        } else {
            stored.reason.or_else(|| {
                Some(match status {
                    DecisionStatus::Revoked => REASON_REVOKED.to_string(),
                    _ => REASON_NOT_FOUND.to_string(),
                })
            })
        };

        Self {
            id: stored.id,
            is_valid,
            verified_at: stored.verified_at,
            verified_by: stored.verified_by,
            status,
            issuer: stored.issuer,
            issued_at: stored.issued_at,
            reason,
        }
    }
}

impl VerificationDecision {
    /// Build a decision from an authority record.
    ///
    /// Everything except a revoked credential is valid.
    #[must_use]
    pub fn found(record: CredentialRecord, verified_by: &str, verified_at: DateTime<Utc>) -> Self {
        let is_valid = record.status != CredentialStatus::Revoked;
        Self {
            id: record.id,
            is_valid,
            verified_at,
            verified_by: verified_by.to_string(),
            status: record.status.into(),
            issuer: Some(record.issuer),
            issued_at: record.issued_at,
            reason: (!is_valid).then(|| REASON_REVOKED.to_string()),
        }
    }

    /// Build a decision for an id the authority does not know.
    #[must_use]
    pub fn not_found(id: &str, verified_by: &str, verified_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            is_valid: false,
            verified_at,
            verified_by: verified_by.to_string(),
            status: DecisionStatus::NotFound,
            issuer: None,
            issued_at: None,
            reason: Some(REASON_NOT_FOUND.to_string()),
        }
    }

    /// Returns true if the authority had no record for this id.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == DecisionStatus::NotFound
    }
}

impl StoreRecord for VerificationDecision {
    fn key(&self) -> &str {
        &self.id
    }
}
