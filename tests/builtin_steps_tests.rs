//! The shipped steps run end to end against an in-memory store holding
//! pre-2.0.0 data.

use docstore_migrate::{
    CancelSignal, IndexSettings, MemoryLedger, MemoryStore, Migrator, RunOutcome, StepRegistry,
    StoreError,
};
use serde_json::json;
use std::sync::Arc;

fn legacy_store(prefix: &str) -> MemoryStore {
    let store = MemoryStore::new();
    let profile = format!("{prefix}-profile");
    store.seed_index(&profile, json!({"mappings": {"properties": {"itemId": {"type": "text"}}}}));
    for id in ["p1", "p2", "p3"] {
        store.seed_document(&profile, id, json!({"itemId": id, "properties": {"nbOfVisits": 2}}));
    }
    let session = format!("{prefix}-session");
    store.seed_index(&session, json!({}));
    store.seed_document(&session, "s1", json!({"profileId": "p1"}));
    store.seed_document(&session, "s2", json!({"profileId": "p2", "scope": "digitall"}));
    for month in ["000001", "000002"] {
        store.seed_index(&format!("{prefix}-event-{month}"), json!({"mappings": {"properties": {}}}));
    }
    store
}

fn migrator(store: &MemoryStore, ledger: &MemoryLedger) -> Migrator {
    Migrator::new(
        StepRegistry::with_builtin_steps().unwrap(),
        Arc::new(store.clone()),
        Arc::new(ledger.clone()),
    )
}

#[tokio::test]
async fn test_upgrade_from_1_6_0() {
    let store = legacy_store("context");
    let ledger = MemoryLedger::new();
    let migrator = migrator(&store, &ledger);

    let report = migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap();
    assert!(report.outcome.is_success(), "{}", report.render());

    assert_eq!(
        store.indices(),
        vec![
            "context-event-000001",
            "context-event-000002",
            "context-profile",
            "context-profilealias",
            "context-session",
        ]
    );
    assert_eq!(store.document_count("context-profile"), 3);
    assert_eq!(
        store.mappings("context-profile").unwrap()["properties"]["itemId"]["type"],
        "keyword"
    );
    assert_eq!(store.document("context-profile", "p1").unwrap()["tenantId"], "system");
    assert_eq!(store.document("context-session", "s1").unwrap()["scope"], "systemscope");
    assert_eq!(store.document("context-session", "s2").unwrap()["scope"], "digitall");
    for event_index in ["context-event-000001", "context-event-000002"] {
        assert_eq!(
            store.mappings(event_index).unwrap()["properties"]["flattenedProperties"]["type"],
            "flattened"
        );
    }
}

#[tokio::test]
async fn test_upgrade_from_2_2_0_only_runs_later_steps() {
    let store = legacy_store("context");
    let ledger = MemoryLedger::new();
    let migrator = migrator(&store, &ledger);

    let report = migrator.run("2.2.0", false, &CancelSignal::new()).await.unwrap();

    assert_eq!(report.applied_ids(), vec!["3.0.0-profile-default-tenant"]);
    assert!(!store.indices().contains(&"context-profilealias".to_string()));
    assert_eq!(store.document("context-session", "s1").unwrap().get("scope"), None);
}

#[tokio::test]
async fn test_custom_prefix_is_honoured() {
    let store = legacy_store("acme");
    let ledger = MemoryLedger::new();
    let migrator = migrator(&store, &ledger).with_index_settings(IndexSettings::default().index_prefix("acme"));

    let report = migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap();

    assert!(report.outcome.is_success());
    assert!(store.indices().contains(&"acme-profilealias".to_string()));
    assert!(store.indices().iter().all(|name| name.starts_with("acme-")));
}

#[tokio::test]
async fn test_store_outage_mid_reindex_resumes_at_the_interrupted_phase() {
    let store = legacy_store("context");
    let ledger = MemoryLedger::new();
    let migrator = migrator(&store, &ledger);

    store.fail_operation("reindex", Some(StoreError::Unavailable("node left the cluster".into())));
    let failed = migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap();
    assert!(matches!(
        &failed.outcome,
        RunOutcome::FailedAtStep { step_id, .. } if step_id == "2.0.0-reindex-profile-recreate"
    ));
    // The documents survive in the clone.
    assert_eq!(store.document_count("context-profile-cloned"), 3);

    store.fail_operation("reindex", None);
    let resumed = migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap();

    assert_eq!(resumed.applied_ids()[0], "2.0.0-reindex-profile-recreate");
    assert_eq!(store.document_count("context-profile"), 3);
    assert!(!store.indices().contains(&"context-profile-cloned".to_string()));
}

#[test]
fn test_yellow_cluster_is_enough_but_red_fails_the_refresh() {
    let store = legacy_store("context");
    let ledger = MemoryLedger::new();
    let migrator = migrator(&store, &ledger);

    store.set_health(docstore_migrate::store::HealthStatus::Red);
    let failed = tokio_test::block_on(migrator.run("1.6.0", false, &CancelSignal::new())).unwrap();
    assert!(matches!(
        &failed.outcome,
        RunOutcome::FailedAtStep { step_id, .. } if step_id == "2.0.0-reindex-profile-refresh"
    ));

    store.set_health(docstore_migrate::store::HealthStatus::Yellow);
    let resumed = tokio_test::block_on(migrator.run("1.6.0", false, &CancelSignal::new())).unwrap();
    assert_eq!(resumed.applied_ids()[0], "2.0.0-reindex-profile-refresh");
    assert!(resumed.outcome.is_success());
}
