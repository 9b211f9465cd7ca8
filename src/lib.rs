//! Test Mender
//!
//! An unattended, self-healing test-repair loop with its own health
//! watchdog.
//!
//! # Features
//!
//! - Test generation at adaptive difficulty tiers
//! - Isolated, time-bounded execution of candidate code
//! - Fix selection from a learned pattern store, with model-backed and
//!   fallback synthesis
//! - Outcome-driven learning of fix insights
//! - Health monitoring of agents, error history, and resources
//! - `SQLite` snapshots of the knowledge store
//!
//! # Quick Start
//!
//! ```bash
//! MODEL_BASE_URL=http://localhost:11434 ./test-mender
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ turn ┌───────────┐   ┌──────────┐   ┌─────────┐   ┌─────────┐
//! │ Orchestrator │─────▶│ Generator │──▶│ Executor │──▶│  Fixer  │──▶│ Learner │
//! └──────────────┘      └───────────┘   └──────────┘   └─────────┘   └─────────┘
//!                              │              │              │             │
//!                              ▼              ▼              ▼             ▼
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                    KnowledgeStore                    │──▶ SQLite
//!                       └──────────────────────────────────────────────────────┘
//!                                                 ▲
//!                                  HealthMonitor ─┘ (own timer)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod config;
pub mod error;
pub mod fix;
pub mod health;
pub mod knowledge;
pub mod learning;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod runtime;
pub mod sandbox;
pub mod traits;

#[cfg(test)]
mod test_utils;
