//! Health monitor behaviour over a live store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use test_case::test_case;
use test_mender::health::{
    AgentTracker, HealthMonitor, HealthStatus, IssueKind, MonitorConfig, Severity,
    HEALTH_CHECK_FAILURE, TEST_GENERATOR,
};
use test_mender::knowledge::{ErrorHistory, KnowledgeStore, ERROR_HISTORY};
use test_mender::orchestrator::FIX_FAILURE;

use super::{FixedClock, StaticGauge};

fn monitor(store: &Arc<KnowledgeStore>, clock: FixedClock) -> HealthMonitor {
    HealthMonitor::new(
        Arc::clone(store),
        Arc::new(StaticGauge(40.0)),
        Arc::new(clock),
        MonitorConfig::default(),
    )
}

#[tokio::test]
async fn test_ten_fix_failures_are_reported_as_recurring() {
    let now = Utc::now();
    let store = Arc::new(KnowledgeStore::new());
    for id in 1..=10 {
        store
            .record_error(FIX_FAILURE, format!("Fix for test {id} failed"), now)
            .await
            .unwrap();
    }

    let report = monitor(&store, FixedClock(now)).check().await.unwrap();

    let recurring: Vec<_> = report.issues_of(IssueKind::RecurringErrors).collect();
    assert_eq!(recurring.len(), 1);
    assert!(recurring[0].message.contains("fix_failure (10x)"));
    assert!(recurring[0].message.contains("Fix for test 10 failed"));
}

#[tokio::test]
async fn test_repeated_passes_count_themselves() {
    let now = Utc::now();
    let store = Arc::new(KnowledgeStore::new());
    let monitor = monitor(&store, FixedClock(now));

    let first = monitor.run_pass().await.unwrap();
    assert_eq!(first.issues_of(IssueKind::RecurringErrors).count(), 0);

    for _ in 2..=10 {
        let report = monitor.run_pass().await.unwrap();
        let recurring: Vec<_> = report.issues_of(IssueKind::RecurringErrors).collect();
        assert_eq!(recurring.len(), 1);
        assert_eq!(recurring[0].severity, Severity::Medium);
    }

    let errors: ErrorHistory = store.get_or_default(ERROR_HISTORY).await.unwrap();
    assert_eq!(errors[HEALTH_CHECK_FAILURE].count, 10);
}

#[test_case(15, Some(Severity::High) ; "fifteen idle minutes stall")]
#[test_case(8, Some(Severity::Medium) ; "eight idle minutes warn")]
#[test_case(5, None ; "five idle minutes do not")]
#[tokio::test]
async fn test_generator_stall_threshold(idle_minutes: i64, expected: Option<Severity>) {
    let now = Utc::now();
    let store = Arc::new(KnowledgeStore::new());
    AgentTracker::new(Arc::clone(&store), TEST_GENERATOR, true)
        .touch(now - Duration::minutes(idle_minutes))
        .await
        .unwrap();

    let report = monitor(&store, FixedClock(now)).check().await.unwrap();

    let issues: Vec<_> = report.issues_of(IssueKind::StalledAgent).collect();
    assert_eq!(issues.first().map(|i| i.severity), expected);
    match expected {
        Some(severity) => {
            assert_eq!(issues.len(), 1);
            assert_eq!(
                issues[0].message,
                format!("{TEST_GENERATOR} has not acted for {idle_minutes} minutes")
            );
            let status = if severity == Severity::High {
                HealthStatus::Critical
            } else {
                HealthStatus::Warning
            };
            assert_eq!(report.status, status);
        }
        None => assert_eq!(report.status, HealthStatus::Warning),
    }
}

#[tokio::test]
async fn test_check_is_idempotent_over_unchanged_store() {
    let now = Utc::now();
    let store = Arc::new(KnowledgeStore::new());
    store
        .record_error(FIX_FAILURE, "Fix for test 1 failed", now)
        .await
        .unwrap();
    store
        .record_error(FIX_FAILURE, "Fix for test 2 failed", now)
        .await
        .unwrap();
    let monitor = monitor(&store, FixedClock(now));
    let revision = store.revision();

    let first = monitor.check().await.unwrap();
    let second = monitor.check().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.revision(), revision);
}
