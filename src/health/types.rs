//! Health issue types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Severity
// ============================================================================

/// Severity of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    /// Informational, no action needed yet.
    Low = 0,
    /// Degraded, worth attention.
    Medium = 1,
    /// The loop is not making progress.
    High = 2,
}

impl Severity {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Issue Kind
// ============================================================================

/// Type of a health issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Data volume nearly full.
    DiskUsage,
    /// No durable snapshot exists.
    NoBackups,
    /// Too few learned patterns.
    LimitedKnowledge,
    /// An agent keeps failing model queries.
    ModelFailures,
    /// An agent has not acted recently.
    StalledAgent,
    /// An error category keeps recurring.
    RecurringErrors,
    /// Unexpected faults were recorded.
    SystemExceptions,
    /// A resource gauge could not be read.
    ResourceCheckError,
    /// Tests keep exhausting their fix attempts.
    UnfixableTests,
    /// Agent circuit breakers are open.
    CircuitBreakersTripped,
}

impl IssueKind {
    /// Snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DiskUsage => "disk_usage",
            Self::NoBackups => "no_backups",
            Self::LimitedKnowledge => "limited_knowledge",
            Self::ModelFailures => "model_failures",
            Self::StalledAgent => "stalled_agent",
            Self::RecurringErrors => "recurring_errors",
            Self::SystemExceptions => "system_exceptions",
            Self::ResourceCheckError => "resource_check_error",
            Self::UnfixableTests => "unfixable_tests",
            Self::CircuitBreakersTripped => "circuit_breakers_tripped",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Health Issue
// ============================================================================

/// A single detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    /// Issue type.
    #[serde(rename = "type")]
    pub kind: IssueKind,
    /// Human-readable summary.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// Structured payload specific to the type.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl HealthIssue {
    /// Create an issue with empty details.
    #[must_use]
    pub fn new(kind: IssueKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity,
            details: serde_json::Value::Null,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

// ============================================================================
// Status
// ============================================================================

/// Aggregate status derived from the highest severity present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No issues.
    #[default]
    Healthy,
    /// Low or medium issues present.
    Warning,
    /// At least one high issue present.
    Critical,
}

impl HealthStatus {
    /// Derive status from a list of issues.
    #[must_use]
    pub fn from_issues(issues: &[HealthIssue]) -> Self {
        match issues.iter().map(|i| i.severity).max() {
            None => Self::Healthy,
            Some(Severity::High) => Self::Critical,
            Some(Severity::Low | Severity::Medium) => Self::Warning,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        })
    }
}

/// Result of one health pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Aggregate status.
    pub status: HealthStatus,
    /// Issues found, in check order.
    pub issues: Vec<HealthIssue>,
    /// When the pass ran.
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Build a report, deriving the status.
    #[must_use]
    pub fn new(issues: Vec<HealthIssue>, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: HealthStatus::from_issues(&issues),
            issues,
            checked_at,
        }
    }

    /// Whether no issues were found.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }

    /// Current issue messages.
    #[must_use]
    pub fn alerts(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.message.clone()).collect()
    }

    /// Issues of one kind.
    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &HealthIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}
