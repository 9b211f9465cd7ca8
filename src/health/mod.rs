//! Health monitoring.
//!
//! The [`HealthMonitor`] runs on its own timer. Each pass reads the knowledge
//! store and the resource gauges, evaluates the checks in [`checks`], and
//! records the outcome back into the store.
//!
//! | check | severity |
//! |-------|----------|
//! | `disk_usage` | medium |
//! | `no_backups` | low |
//! | `limited_knowledge` | low |
//! | `model_failures` | medium |
//! | `stalled_agent` | medium, high past ten minutes |
//! | `circuit_breakers_tripped` | medium, high for more than one |
//! | `system_exceptions` | high |
//! | `unfixable_tests` | medium |
//! | `recurring_errors` | medium |
//! | `resource_check_error` | medium |

mod agents;
pub mod checks;
mod monitor;
mod gauge;
mod types;

pub use agents::{
    AgentStatus, AgentStatusMap, AgentTracker, FIXER, LEARNER, MODEL_FAILURE_FLOOR, MONITOR,
    TEST_EXECUTOR, TEST_GENERATOR,
};
pub use checks::{evaluate, HealthInputs, HEALTH_CHECK_FAILURE, SYSTEM_EXCEPTION, UNFIXABLE_TEST};
pub use monitor::{HealthMonitor, MonitorConfig};
pub use gauge::SystemResourceGauge;
pub use types::{HealthIssue, HealthReport, HealthStatus, IssueKind, Severity};
