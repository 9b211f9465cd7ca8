//! Durable snapshots and runtime shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serial_test::serial;
use tempfile::TempDir;
use test_mender::channel::ChannelMessage;
use test_mender::config::LoopSettings;
use test_mender::health::IssueKind;
use test_mender::knowledge::persist::{rehydrate, Persister};
use test_mender::knowledge::{
    ErrorHistory, KnowledgeStore, SqliteSnapshotStore, TestExecutionStats, ERROR_HISTORY,
    TEST_EXECUTION_STATS,
};
use test_mender::runtime::Runtime;
use tokio::sync::broadcast::error::TryRecvError;

use super::{model, FixedClock, StaticGauge, StubModel};

fn temp_db() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("data").join("knowledge.db");
    (dir, path)
}

#[tokio::test]
#[serial]
async fn test_snapshot_survives_reopen() {
    let (_dir, path) = temp_db();
    let now = Utc::now();

    let store = Arc::new(KnowledgeStore::new());
    store
        .record_error("fix_failure", "Fix for test 1 failed", now)
        .await
        .unwrap();
    store
        .update_as(TEST_EXECUTION_STATS, |stats: &mut TestExecutionStats| {
            stats.record(true);
            stats.record(false);
            Ok(())
        })
        .await
        .unwrap();

    let backend = Arc::new(SqliteSnapshotStore::new(&path).await.unwrap());
    let persister = Persister::new(Arc::clone(&store), backend, Duration::from_secs(60));
    persister.persist_now().await.unwrap();
    assert!(store.last_durable().is_some());

    let reopened = SqliteSnapshotStore::new(&path).await.unwrap();
    let loaded = rehydrate(&reopened).await;

    assert!(loaded.restored());
    assert_eq!(
        loaded.store.snapshot().await.entries,
        store.snapshot().await.entries
    );
    let errors: ErrorHistory = loaded.store.get_or_default(ERROR_HISTORY).await.unwrap();
    assert_eq!(errors["fix_failure"].count, 1);
    let stats: TestExecutionStats = loaded
        .store
        .get_or_default(TEST_EXECUTION_STATS)
        .await
        .unwrap();
    assert_eq!(stats.tests_run, 2);
}

#[tokio::test]
#[serial]
async fn test_missing_database_starts_empty_with_issue() {
    let (_dir, path) = temp_db();

    let backend = SqliteSnapshotStore::new(&path).await.unwrap();
    let loaded = rehydrate(&backend).await;

    assert!(!loaded.restored());
    assert_eq!(loaded.issues.len(), 1);
    assert_eq!(loaded.issues[0].kind, IssueKind::NoBackups);
    assert!(loaded.store.keys().await.is_empty());
}

#[tokio::test]
async fn test_runtime_runs_and_persists_on_shutdown() {
    let backend = Arc::new(SqliteSnapshotStore::new_in_memory().await.unwrap());
    let mut settings = LoopSettings::default();
    settings.orchestrator.tests_per_turn = 1;
    settings.orchestrator.cycle_delay = Duration::from_millis(20);
    settings.monitor.interval = Duration::from_millis(20);

    let runtime = Runtime::build(
        &settings,
        Duration::from_secs(60),
        model(StubModel::Unavailable),
        backend.clone(),
        Arc::new(StaticGauge(10.0)),
        Arc::new(FixedClock(Utc::now())),
    )
    .await;
    assert_eq!(runtime.startup_issues().len(), 1);
    assert_eq!(runtime.startup_issues()[0].kind, IssueKind::NoBackups);

    let store = runtime.store();
    let orchestrator = runtime.orchestrator();
    let mut status = runtime.subscribe();

    runtime
        .run_until(tokio::time::sleep(Duration::from_millis(300)))
        .await;

    assert!(orchestrator.turns() >= 1);
    assert!(store.last_durable().is_some());
    assert!(backend.count().await.unwrap() >= 1);

    let mut saw_status = false;
    loop {
        match status.try_recv() {
            Ok(ChannelMessage::StatusUpdate { .. }) => saw_status = true,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    assert!(saw_status);
}
