//! Individual health checks.
//!
//! Every check is a pure function of [`HealthInputs`] and the monitor
//! settings, so a pass over unchanged inputs yields the same issues.

use chrono::{DateTime, Utc};
use serde_json::json;

use super::agents::AgentStatusMap;
use super::monitor::MonitorConfig;
use super::types::{HealthIssue, IssueKind, Severity};
use crate::knowledge::persist::NO_BACKUPS_MESSAGE;
use crate::knowledge::{ErrorHistory, ErrorRecord};
use crate::pipeline::truncate_chars;

/// Category the monitor folds each failing pass into.
pub const HEALTH_CHECK_FAILURE: &str = "health_check_failure";
/// Category of unexpected faults.
pub const SYSTEM_EXCEPTION: &str = "system_exception";
/// Category of tests that exhausted their fix attempts.
pub const UNFIXABLE_TEST: &str = "unfixable_test";

const DETAIL_PREVIEW: usize = 100;

/// Everything one pass looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthInputs {
    /// Reference time of the pass.
    pub now: DateTime<Utc>,
    /// Disk usage of the data volume, or why it could not be read.
    pub disk_usage: Result<f64, String>,
    /// Whether a durable snapshot exists.
    pub has_backup: bool,
    /// Distinct fix patterns plus retained insight strings.
    pub knowledge_items: usize,
    /// Agent activity.
    pub agents: AgentStatusMap,
    /// Error records.
    pub errors: ErrorHistory,
}

/// Run every check and return issues in a fixed order.
///
/// The recurring-error check sees `health_check_failure` as it will be after
/// this pass is folded in, so an issue set that keeps reappearing counts
/// itself.
#[must_use]
pub fn evaluate(inputs: &HealthInputs, config: &MonitorConfig) -> Vec<HealthIssue> {
    let mut issues = Vec::new();
    issues.extend(disk(inputs, config));
    issues.extend(backups(inputs));
    issues.extend(knowledge(inputs, config));
    issues.extend(model_failures(inputs, config));
    issues.extend(stalled_agents(inputs, config));
    issues.extend(circuit_breakers(inputs));
    issues.extend(system_exceptions(inputs, config));
    issues.extend(unfixable_tests(inputs, config));

    let mut projected = inputs.errors.clone();
    if !issues.is_empty() {
        let pending = issues
            .iter()
            .map(|i| i.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        projected
            .entry(HEALTH_CHECK_FAILURE.to_string())
            .and_modify(|r| r.record(pending.clone(), inputs.now))
            .or_insert_with(|| ErrorRecord::new(pending, inputs.now));
    }
    issues.extend(recurring_errors(&projected, inputs.now, config));
    issues
}

fn disk(inputs: &HealthInputs, config: &MonitorConfig) -> Option<HealthIssue> {
    match &inputs.disk_usage {
        Ok(usage) if *usage >= config.disk_threshold_percent => Some(
            HealthIssue::new(
                IssueKind::DiskUsage,
                Severity::Medium,
                format!("Disk usage is high: {usage:.1}%"),
            )
            .with_details(json!({ "usage_percent": usage })),
        ),
        Ok(_) => None,
        Err(reason) => Some(
            HealthIssue::new(
                IssueKind::ResourceCheckError,
                Severity::Medium,
                format!("Resource check failed: {reason}"),
            )
            .with_details(json!({ "error": reason })),
        ),
    }
}

fn backups(inputs: &HealthInputs) -> Option<HealthIssue> {
    (!inputs.has_backup)
        .then(|| HealthIssue::new(IssueKind::NoBackups, Severity::Low, NO_BACKUPS_MESSAGE))
}

fn knowledge(inputs: &HealthInputs, config: &MonitorConfig) -> Option<HealthIssue> {
    (inputs.knowledge_items < config.knowledge_floor).then(|| {
        HealthIssue::new(
            IssueKind::LimitedKnowledge,
            Severity::Low,
            format!(
                "Limited knowledge: only {} fix patterns and insights learned",
                inputs.knowledge_items
            ),
        )
        .with_details(json!({ "items": inputs.knowledge_items, "floor": config.knowledge_floor }))
    })
}

fn model_failures(inputs: &HealthInputs, config: &MonitorConfig) -> Vec<HealthIssue> {
    inputs
        .agents
        .iter()
        .filter(|(_, status)| status.model_failure_count >= config.model_failure_floor)
        .map(|(name, status)| {
            HealthIssue::new(
                IssueKind::ModelFailures,
                Severity::Medium,
                format!(
                    "{name} has {} consecutive model failures",
                    status.model_failure_count
                ),
            )
            .with_details(json!({ "agent": name, "failures": status.model_failure_count }))
        })
        .collect()
}

fn stalled_agents(inputs: &HealthInputs, config: &MonitorConfig) -> Vec<HealthIssue> {
    let (Ok(warn_after), Ok(stall_after)) = (
        chrono::Duration::from_std(config.stall_warn_after),
        chrono::Duration::from_std(config.stall_after),
    ) else {
        return Vec::new();
    };
    inputs
        .agents
        .iter()
        .filter(|(_, status)| status.expects_periodic)
        .filter_map(|(name, status)| {
            let last = status.last_action_at?;
            let idle = inputs.now.signed_duration_since(last);
            (idle > warn_after).then(|| {
                let severity = if idle > stall_after {
                    Severity::High
                } else {
                    Severity::Medium
                };
                HealthIssue::new(
                    IssueKind::StalledAgent,
                    severity,
                    format!("{name} has not acted for {} minutes", idle.num_minutes()),
                )
                .with_details(json!({
                    "agent": name,
                    "idle_seconds": idle.num_seconds(),
                    "last_action_at": last,
                }))
            })
        })
        .collect()
}

fn circuit_breakers(inputs: &HealthInputs) -> Option<HealthIssue> {
    let tripped: Vec<&str> = inputs
        .agents
        .iter()
        .filter(|(_, status)| status.circuit_open)
        .map(|(name, _)| name.as_str())
        .collect();
    if tripped.is_empty() {
        return None;
    }
    let severity = if tripped.len() > 1 {
        Severity::High
    } else {
        Severity::Medium
    };
    Some(
        HealthIssue::new(
            IssueKind::CircuitBreakersTripped,
            severity,
            format!("Circuit breakers tripped for: {}", tripped.join(", ")),
        )
        .with_details(json!({ "agents": tripped })),
    )
}

fn within(record: &ErrorRecord, now: DateTime<Utc>, window: std::time::Duration) -> bool {
    chrono::Duration::from_std(window)
        .map_or(true, |window| now.signed_duration_since(record.last_seen) <= window)
}

fn system_exceptions(inputs: &HealthInputs, config: &MonitorConfig) -> Option<HealthIssue> {
    let record = inputs.errors.get(SYSTEM_EXCEPTION)?;
    (record.count > config.system_exception_floor
        && within(record, inputs.now, config.system_exception_window))
    .then(|| {
        HealthIssue::new(
            IssueKind::SystemExceptions,
            Severity::High,
            format!(
                "System experienced {} exceptions, most recent: {}",
                record.count,
                truncate_chars(&record.details, DETAIL_PREVIEW)
            ),
        )
        .with_details(json!({ "count": record.count, "last_seen": record.last_seen }))
    })
}

fn unfixable_tests(inputs: &HealthInputs, config: &MonitorConfig) -> Option<HealthIssue> {
    let record = inputs.errors.get(UNFIXABLE_TEST)?;
    (record.count > config.unfixable_floor).then(|| {
        HealthIssue::new(
            IssueKind::UnfixableTests,
            Severity::Medium,
            format!("{} tests could not be fixed", record.count),
        )
        .with_details(json!({ "count": record.count }))
    })
}

fn recurring_errors(
    errors: &ErrorHistory,
    now: DateTime<Utc>,
    config: &MonitorConfig,
) -> Option<HealthIssue> {
    let recurring: Vec<(&String, &ErrorRecord)> = errors
        .iter()
        .filter(|(_, record)| {
            record.count > config.recurring_threshold
                && within(record, now, config.recurring_window)
        })
        .collect();
    if recurring.is_empty() {
        return None;
    }

    let summary = recurring
        .iter()
        .map(|(category, record)| {
            format!(
                "{category} ({}x): {}",
                record.count,
                truncate_chars(&record.details, DETAIL_PREVIEW)
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    let details: Vec<_> = recurring
        .iter()
        .map(|(category, record)| {
            json!({
                "category": category,
                "count": record.count,
                "last_seen": record.last_seen,
            })
        })
        .collect();

    Some(
        HealthIssue::new(
            IssueKind::RecurringErrors,
            Severity::Medium,
            truncate_chars(
                &format!("Recurring errors: {summary}"),
                config.message_limit,
            ),
        )
        .with_details(json!({ "errors": details })),
    )
}
