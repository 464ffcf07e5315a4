//! Engine-level tests against real log and indexed stores.

use super::{CountingBackend, TestHarness};
use credential_verifier::record::UNKNOWN_WORKER;
use credential_verifier::storage::{IndexedStore, LogStore, RowLayout};
use credential_verifier::{
    Access, AuthorityReader, BackendKind, CredentialRecord, CredentialStatus, DecisionStatus,
    Error, StorageBackend, VerificationCache, VerificationDecision, VerificationEngine,
};
use futures::future::join_all;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const BACKENDS: [BackendKind; 2] = [BackendKind::Log, BackendKind::Indexed];

fn engine_over(
    store: Arc<dyn StorageBackend<VerificationDecision>>,
    authority: Arc<dyn StorageBackend<CredentialRecord>>,
    query_timeout: Duration,
) -> VerificationEngine {
    VerificationEngine::new(
        VerificationCache::new(store, 16, Duration::from_secs(5)),
        AuthorityReader::new(authority, query_timeout),
        "worker-1",
    )
}

#[tokio::test]
async fn test_positive_decision_is_final() {
    for kind in BACKENDS {
        let harness = TestHarness::setup(kind);
        harness.issue(CredentialRecord::new("cred-1", "Acme University"));
        let engine = harness.engine();

        let first = engine.verify("cred-1").await.expect("first verify");
        let second = engine.verify("cred-1").await.expect("second verify");

        assert!(first.is_valid, "{kind}: first decision should be valid");
        assert_eq!(first, second, "{kind}: decision must be replayed verbatim");
        assert_eq!(harness.authority_reads(), 1, "{kind}");
        assert_eq!(harness.stored_len(), 1, "{kind}");
        assert_eq!(harness.stored("cred-1"), Some(first));
    }
}

#[tokio::test]
async fn test_positive_decision_survives_restart() {
    for kind in BACKENDS {
        let harness = TestHarness::setup(kind);
        harness.issue(CredentialRecord::new("cred-1", "Acme"));

        let first = harness.engine().verify("cred-1").await.expect("verify");
        // Fresh in-memory cache over the same stores.
        let replayed = harness
            .sibling("worker-2")
            .verify("cred-1")
            .await
            .expect("verify after restart");

        assert_eq!(first, replayed, "{kind}");
        assert_eq!(replayed.verified_by, "worker-1", "{kind}");
        assert_eq!(harness.authority_reads(), 1, "{kind}");
    }
}

#[tokio::test]
async fn test_revocation_after_positive_is_not_observed() {
    for kind in BACKENDS {
        let harness = TestHarness::setup(kind);
        harness.issue(CredentialRecord::new("cred-1", "Acme"));
        let engine = harness.engine();

        assert!(engine.verify("cred-1").await.expect("verify").is_valid);
        harness.issue(CredentialRecord::new("cred-1", "Acme").with_status(CredentialStatus::Revoked));

        let decision = engine.verify("cred-1").await.expect("verify again");
        assert!(decision.is_valid, "{kind}");
        assert_eq!(decision.status, DecisionStatus::Valid, "{kind}");
    }
}

#[tokio::test]
async fn test_not_found_then_issued() {
    for kind in BACKENDS {
        let harness = TestHarness::setup(kind);
        let engine = harness.engine();

        let missing = engine.verify("cred-7").await.expect("verify missing");
        assert!(!missing.is_valid, "{kind}");
        assert!(missing.is_not_found(), "{kind}");
        assert_eq!(missing.reason.as_deref(), Some("Credential not found"));
        assert_eq!(harness.stored("cred-7"), Some(missing));

        harness.issue(CredentialRecord::new("cred-7", "Acme"));
        let found = engine.verify("cred-7").await.expect("verify issued");

        assert!(found.is_valid, "{kind}");
        assert_eq!(found.issuer.as_deref(), Some("Acme"));
        assert_eq!(harness.authority_reads(), 2, "{kind}");
        assert_eq!(harness.stored_len(), 1, "{kind}");
        assert_eq!(harness.stored("cred-7"), Some(found));
    }
}

#[tokio::test]
async fn test_revoked_is_rechecked() {
    for kind in BACKENDS {
        let harness = TestHarness::setup(kind);
        harness.issue(CredentialRecord::new("cred-2", "Acme").with_status(CredentialStatus::Revoked));
        let engine = harness.engine();

        let revoked = engine.verify("cred-2").await.expect("verify revoked");
        assert!(!revoked.is_valid, "{kind}");
        assert_eq!(revoked.status, DecisionStatus::Revoked, "{kind}");
        assert_eq!(revoked.reason.as_deref(), Some("Credential revoked"));

        // Reinstated at the authority: the negative decision is not final.
        harness.issue(CredentialRecord::new("cred-2", "Acme"));
        assert!(engine.verify("cred-2").await.expect("verify reinstated").is_valid);
        assert_eq!(harness.authority_reads(), 2, "{kind}");
    }
}

#[tokio::test]
async fn test_suspended_counts_as_valid() {
    let harness = TestHarness::setup(BackendKind::Log);
    harness.issue(CredentialRecord::new("cred-3", "Acme").with_status(CredentialStatus::Suspended));

    let decision = harness.engine().verify("cred-3").await.expect("verify");
    assert!(decision.is_valid);
    assert_eq!(decision.status, DecisionStatus::Suspended);
    assert!(decision.reason.is_none());
}

#[tokio::test]
async fn test_empty_id_writes_nothing() {
    for kind in BACKENDS {
        let harness = TestHarness::setup(kind);
        let engine = harness.engine();

        for id in ["", " ", "\t"] {
            assert!(matches!(
                engine.verify(id).await,
                Err(Error::InvalidRequest(_))
            ));
        }
        assert_eq!(harness.authority_reads(), 0, "{kind}");
        assert_eq!(harness.stored_len(), 0, "{kind}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_verifications_agree() {
    for kind in BACKENDS {
        let harness = TestHarness::setup(kind);
        harness.issue(CredentialRecord::new("cred-9", "Acme"));

        // Separate engines so no in-memory cache can serialize the race.
        let engines: Vec<Arc<VerificationEngine>> = (0..8)
            .map(|i| harness.sibling(&format!("worker-{i}")))
            .collect();
        let tasks = engines.into_iter().map(|engine| {
            tokio::spawn(async move { engine.verify("cred-9").await })
        });

        let decisions: Vec<VerificationDecision> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.expect("join").expect("verify"))
            .collect();

        let first = &decisions[0];
        assert!(first.is_valid, "{kind}");
        for decision in &decisions {
            assert_eq!(decision, first, "{kind}: racing workers disagree");
        }
        assert_eq!(harness.stored_len(), 1, "{kind}");
        assert_eq!(harness.stored("cred-9").as_ref(), Some(first));
    }
}

#[tokio::test]
async fn test_corrupt_log_store_is_recovered() {
    let harness = TestHarness::setup(BackendKind::Log);
    harness.issue(CredentialRecord::new("cred-1", "Acme"));
    std::fs::write(harness.store_path(), "{ this is not json").expect("corrupt store");
    let engine = harness.engine();

    let decision = engine.verify("cred-1").await.expect("verify");

    assert!(decision.is_valid);
    assert_eq!(engine.cache_stats().read_errors, 1);
    assert_eq!(harness.stored_len(), 1);
    let aside = LogStore::<VerificationDecision>::new(harness.store_path(), Access::ReadOnly)
        .quarantine_path();
    assert_eq!(
        std::fs::read_to_string(aside).expect("quarantined file"),
        "{ this is not json\n"
    );
}

#[tokio::test]
async fn test_corrupt_indexed_row_is_overwritten() {
    let harness = TestHarness::setup(BackendKind::Indexed);
    harness.issue(CredentialRecord::new("cred-1", "Acme"));
    {
        let conn = rusqlite::Connection::open(harness.store_path()).expect("open db");
        conn.execute(
            "INSERT INTO verifications (id, record) VALUES (?1, ?2)",
            rusqlite::params!["cred-1", "garbage"],
        )
        .expect("plant corrupt row");
    }
    let engine = harness.engine();

    let decision = engine.verify("cred-1").await.expect("verify");

    assert!(decision.is_valid);
    assert_eq!(engine.cache_stats().read_errors, 1);
    assert_eq!(harness.stored("cred-1"), Some(decision));
}

#[tokio::test]
async fn test_corrupt_authority_fails_open() {
    for kind in BACKENDS {
        let harness = TestHarness::setup(kind);
        std::fs::write(harness.authority_path(), b"definitely not a store").expect("corrupt");

        let decision = harness.engine().verify("cred-1").await.expect("verify");

        assert!(!decision.is_valid, "{kind}");
        assert!(decision.is_not_found(), "{kind}");
        assert_eq!(harness.stored_len(), 1, "{kind}");
    }
}

#[tokio::test]
async fn test_missing_authority_reads_as_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(LogStore::<VerificationDecision>::new(
        dir.path().join("verifications.json"),
        Access::ReadWrite,
    ));
    let authority = Arc::new(LogStore::<CredentialRecord>::new(
        dir.path().join("nowhere").join("credentials.json"),
        Access::ReadOnly,
    ));
    let engine = VerificationEngine::new(
        VerificationCache::new(store, 16, Duration::from_secs(5)),
        AuthorityReader::new(authority, Duration::from_secs(5)),
        "worker-1",
    );

    let decision = engine.verify("cred-1").await.expect("verify");
    assert!(decision.is_not_found());
    assert!(!dir.path().join("nowhere").exists());
}

#[tokio::test]
async fn test_unwritable_store_reports_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").expect("blocker file");

    let store = Arc::new(LogStore::<VerificationDecision>::new(
        blocker.join("verifications.json"),
        Access::ReadWrite,
    ));
    let authority = Arc::new(LogStore::<CredentialRecord>::new(
        dir.path().join("credentials.json"),
        Access::ReadOnly,
    ));
    let engine = VerificationEngine::new(
        VerificationCache::new(store, 16, Duration::from_secs(5)),
        AuthorityReader::new(authority, Duration::from_secs(5)),
        "worker-1",
    );

    let result = engine.verify("cred-1").await;
    assert!(matches!(result, Err(Error::StorageUnavailable(_))));
}

#[tokio::test]
async fn test_unreadable_log_entry_does_not_hide_positive_decisions() {
    let harness = TestHarness::setup(BackendKind::Log);
    harness.issue(CredentialRecord::new("good", "Acme"));
    let first = harness.engine().verify("good").await.expect("verify");
    assert!(first.is_valid);

    let path = harness.store_path();
    let mut entries: Vec<Value> =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");
    entries.push(json!({ "id": "other", "isValid": "yes" }));
    std::fs::write(&path, serde_json::to_string(&entries).expect("encode")).expect("write");
    harness.issue(CredentialRecord::new("good", "Acme").with_status(CredentialStatus::Revoked));

    // Fresh in-memory cache, so the answer has to come from the file.
    let sibling = harness.sibling("worker-2");
    let replayed = sibling.verify("good").await.expect("replay");
    assert_eq!(replayed, first);
    assert_eq!(harness.authority_reads(), 1);

    // A write elsewhere moves the bad entry aside and keeps the rest.
    assert!(sibling.verify("fresh").await.expect("verify fresh").is_not_found());
    assert_eq!(harness.stored("good"), Some(first));
    assert_eq!(harness.stored_len(), 2);
    let aside = LogStore::<VerificationDecision>::new(path, Access::ReadOnly).quarantine_path();
    assert!(std::fs::read_to_string(aside)
        .expect("quarantined entry")
        .contains(r#""isValid":"yes""#));
}

#[tokio::test]
async fn test_legacy_log_entries_are_replayed() {
    let harness = TestHarness::setup(BackendKind::Log);
    // Shape written by the earlier JSON-file service: no verifiedBy, and no
    // status on negative entries. Entries were appended, never replaced.
    let legacy = r#"[
  {
    "id": "old-1",
    "isValid": false,
    "verifiedAt": "2024-04-30T09:00:00.000Z",
    "reason": "Credential not found"
  },
  {
    "id": "old-1",
    "isValid": true,
    "verifiedAt": "2024-05-01T10:15:00.000Z",
    "issuer": "Acme University",
    "issuedAt": "2024-04-30T12:00:00.000Z",
    "status": "valid"
  }
]"#;
    std::fs::write(harness.store_path(), legacy).expect("seed legacy log");

    let decision = harness.engine().verify("old-1").await.expect("verify");

    assert!(decision.is_valid);
    assert_eq!(decision.verified_by, UNKNOWN_WORKER);
    assert_eq!(decision.issuer.as_deref(), Some("Acme University"));
    assert_eq!(harness.authority_reads(), 0);
    let aside = LogStore::<VerificationDecision>::new(harness.store_path(), Access::ReadOnly)
        .quarantine_path();
    assert!(!aside.exists());
}

#[tokio::test]
async fn test_columnar_authority_table_is_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let authority_path = dir.path().join("credentials.db");
    {
        let conn = rusqlite::Connection::open(&authority_path).expect("open issuance db");
        conn.execute_batch(
            "CREATE TABLE credentials (
                id TEXT PRIMARY KEY,
                issuer TEXT,
                issued_at TEXT,
                status TEXT
            );
            INSERT INTO credentials VALUES
                ('cred-1', 'Acme', '2024-04-30T12:00:00.000Z', 'valid'),
                ('cred-2', NULL, NULL, 'revoked');",
        )
        .expect("seed issuance db");
    }
    let authority = IndexedStore::<CredentialRecord>::open(
        authority_path.clone(),
        "credentials",
        Access::ReadOnly,
        Duration::from_secs(5),
    )
    .expect("open authority");
    assert_eq!(authority.layout().expect("layout"), Some(RowLayout::Columns));

    let store = IndexedStore::<VerificationDecision>::open(
        dir.path().join("verifications.db"),
        "verifications",
        Access::ReadWrite,
        Duration::from_secs(5),
    )
    .expect("open store");
    let engine = engine_over(Arc::new(store), Arc::new(authority), Duration::from_secs(5));

    let valid = engine.verify("cred-1").await.expect("verify cred-1");
    assert!(valid.is_valid);
    assert_eq!(valid.issuer.as_deref(), Some("Acme"));
    assert!(valid.issued_at.is_some());

    let revoked = engine.verify("cred-2").await.expect("verify cred-2");
    assert_eq!(revoked.status, DecisionStatus::Revoked);
    assert_eq!(revoked.issuer.as_deref(), Some("Unknown"));

    assert!(engine.verify("cred-3").await.expect("verify cred-3").is_not_found());

    // The issuer's table cannot serve as a writable decision store.
    assert!(matches!(
        IndexedStore::<CredentialRecord>::open(
            authority_path,
            "credentials",
            Access::ReadWrite,
            Duration::from_secs(5),
        ),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn test_slow_authority_times_out_to_not_found() {
    let harness = TestHarness::setup(BackendKind::Log);
    harness.issue(CredentialRecord::new("cred-1", "Acme"));

    let reader = LogStore::<CredentialRecord>::new(harness.authority_path(), Access::ReadOnly);
    let slow = Arc::new(CountingBackend::with_delay(
        Arc::new(reader),
        Duration::from_millis(500),
    ));
    let store = LogStore::<VerificationDecision>::new(harness.store_path(), Access::ReadWrite);
    let engine = engine_over(
        Arc::new(store),
        Arc::clone(&slow) as Arc<dyn StorageBackend<CredentialRecord>>,
        Duration::from_millis(50),
    );

    let decision = engine.verify("cred-1").await.expect("verify");

    assert!(decision.is_not_found());
    assert_eq!(slow.reads(), 1);
    assert_eq!(harness.stored_len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_positive_decision_replayed(
        id in "[a-z0-9][a-z0-9-]{0,23}",
        issuer in "[A-Za-z][A-Za-z ]{0,15}",
        calls in 2usize..5,
    ) {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let harness = TestHarness::setup(BackendKind::Log);
        harness.issue(CredentialRecord::new(id.clone(), issuer.clone()));
        let engine = harness.engine();

        let first = runtime.block_on(engine.verify(&id)).expect("verify");
        for _ in 1..calls {
            let again = runtime.block_on(engine.verify(&id)).expect("verify again");
            prop_assert_eq!(&again, &first);
        }
        prop_assert!(first.is_valid);
        prop_assert_eq!(first.issuer.as_deref(), Some(issuer.as_str()));
        prop_assert_eq!(harness.authority_reads(), 1);
        prop_assert_eq!(harness.stored_len(), 1);
    }
}
