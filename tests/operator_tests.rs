//! Dry-run rehearsals, run locking and the operator history commands.

use docstore_migrate::{
    CancelSignal, CheckpointLedger, FileLedger, LockHolder, MemoryLedger, MemoryStore,
    MigrateError, MigrationConfig, Migrator, RunLock, RunOutcome, StepDisposition, StepRegistry,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn legacy_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.seed_index("context-profile", json!({"mappings": {"properties": {}}}));
    store.seed_document("context-profile", "p1", json!({"itemId": "p1"}));
    store.seed_index("context-session", json!({}));
    store.seed_document("context-session", "s1", json!({"profileId": "p1"}));
    store.seed_index("context-event-000001", json!({}));
    store
}

#[tokio::test]
async fn test_dry_run_rehearses_without_mutating_or_checkpointing() {
    let store = legacy_store();
    let ledger = MemoryLedger::new();
    let migrator = Migrator::new(
        StepRegistry::with_builtin_steps().unwrap(),
        Arc::new(store.clone()),
        Arc::new(ledger.clone()),
    );

    let report = migrator.run("1.6.0", true, &CancelSignal::new()).await.unwrap();

    assert!(report.dry_run);
    assert!(report.outcome.is_success());
    assert!(store.mutations().is_empty());
    assert!(ledger.completed_ids().is_empty());
    assert!(report
        .steps
        .iter()
        .all(|step| step.disposition == Some(StepDisposition::DryRun)));
    assert!(report.lines.iter().any(|line| line == "dry-run 2.0.0-create-profilealias-index"));
    assert!(report
        .lines
        .iter()
        .any(|line| line == "  would create index context-profilealias"));
    assert_eq!(store.document("context-session", "s1").unwrap().get("scope"), None);
}

#[tokio::test]
async fn test_dry_run_skips_steps_already_applied() {
    let store = legacy_store();
    let ledger = MemoryLedger::new();
    let migrator = Migrator::new(
        StepRegistry::with_builtin_steps().unwrap(),
        Arc::new(store.clone()),
        Arc::new(ledger.clone()),
    );
    migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap();
    let mutations = store.mutations().len();

    let rehearsal = migrator.run("1.6.0", true, &CancelSignal::new()).await.unwrap();

    assert!(rehearsal.rehearsed_ids().is_empty());
    assert_eq!(rehearsal.skipped_ids().len(), migrator.registry().step_count());
    assert_eq!(store.mutations().len(), mutations);
}

#[tokio::test]
async fn test_second_run_is_refused_while_the_lock_is_held() {
    let dir = TempDir::new().unwrap();
    let config = MigrationConfig::default().ledger_dir(dir.path());
    let migrator = Migrator::from_config(&config, StepRegistry::new()).await.unwrap();
    let lock_path = migrator.lock_path().unwrap().to_path_buf();

    let held = RunLock::acquire(&lock_path).unwrap();
    let err = migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap_err();
    match &err {
        MigrateError::AlreadyRunning { holder, .. } => {
            assert!(holder.contains(&held.holder().run_id.to_string()))
        }
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 2);
    assert!(migrator.purge_history().await.is_err());

    drop(held);
    assert!(!lock_path.exists());
    let report = migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::NothingToDo);
    assert!(!lock_path.exists());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_lock_left_by_a_killed_run_does_not_block_recovery() {
    let dir = TempDir::new().unwrap();
    let config = MigrationConfig::default().ledger_dir(dir.path());
    let migrator = Migrator::from_config(&config, StepRegistry::new()).await.unwrap();
    let lock_path = migrator.lock_path().unwrap().to_path_buf();
    let killed = LockHolder {
        run_id: uuid::Uuid::new_v4(),
        pid: u32::MAX,
        acquired_at: chrono::Utc::now(),
    };
    std::fs::write(&lock_path, serde_json::to_vec(&killed).unwrap()).unwrap();

    let report = migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::NothingToDo);
    assert!(!lock_path.exists());
}

#[tokio::test]
async fn test_force_unlock_clears_a_garbled_lock() {
    let dir = TempDir::new().unwrap();
    let config = MigrationConfig::default().ledger_dir(dir.path());
    let migrator = Migrator::from_config(&config, StepRegistry::new()).await.unwrap();
    let lock_path = migrator.lock_path().unwrap().to_path_buf();
    std::fs::write(&lock_path, b"").unwrap();

    let err = migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);

    assert!(migrator.force_unlock().unwrap());
    assert!(!migrator.force_unlock().unwrap());
    let report = migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::NothingToDo);
}

#[tokio::test]
async fn test_forget_replays_one_step_and_purge_replays_all() {
    let dir = TempDir::new().unwrap();
    let store = legacy_store();
    let ledger = FileLedger::open(dir.path(), Some("acme")).await.unwrap();
    let lock_path = ledger.dir().join("migration.lock");
    let ledger = Arc::new(ledger);
    let migrator = Migrator::new(
        StepRegistry::with_builtin_steps().unwrap(),
        Arc::new(store.clone()),
        ledger.clone(),
    )
    .with_lock_path(&lock_path);

    migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap();
    let total = migrator.history().await.unwrap().len();
    assert_eq!(total, migrator.registry().step_count());

    assert!(migrator.forget("2.2.0-event-flattened-properties").await.unwrap());
    assert!(!migrator.forget("2.2.0-event-flattened-properties").await.unwrap());
    let replay = migrator.run("1.6.0", false, &CancelSignal::new()).await.unwrap();
    assert_eq!(replay.applied_ids(), vec!["2.2.0-event-flattened-properties"]);

    assert_eq!(migrator.purge_history().await.unwrap(), total);
    assert!(ledger.history().await.unwrap().is_empty());
}
