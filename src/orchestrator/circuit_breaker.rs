//! Per-agent circuit breakers.
//!
//! A breaker opens after consecutive agent failures, stays open for a
//! cooldown, then lets calls through half-open until enough succeed.
//! Callers pass the current [`Instant`] in, so transitions are driven by the
//! caller's clock.

use std::time::{Duration, Instant};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls proceed.
    Closed,
    /// Calls are refused until the cooldown elapses.
    Open,
    /// Calls proceed on probation.
    HalfOpen,
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,
    /// Time an open breaker refuses calls.
    pub cooldown: Duration,
    /// Consecutive half-open successes that close the breaker.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
            success_threshold: 2,
        }
    }
}

/// Breaker guarding one agent.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    agent: &'static str,
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    trips: u64,
}

impl CircuitBreaker {
    /// Closed breaker for `agent`.
    #[must_use]
    pub const fn new(agent: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            agent,
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            trips: 0,
        }
    }

    /// Guarded agent.
    #[must_use]
    pub const fn agent(&self) -> &'static str {
        self.agent
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether the breaker is refusing calls.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Times the breaker has opened.
    #[must_use]
    pub const fn trips(&self) -> u64 {
        self.trips
    }

    /// Whether a call may proceed at `now`. An open breaker whose cooldown
    /// has elapsed moves to half-open and allows the call.
    pub fn allows(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.config.cooldown);
                if cooled {
                    self.state = CircuitState::HalfOpen;
                    self.consecutive_successes = 0;
                    tracing::info!(agent = self.agent, "Circuit half-open");
                }
                cooled
            }
        }
    }

    /// Cooldown left at `now`, if open.
    #[must_use]
    pub fn remaining_cooldown(&self, now: Instant) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        self.opened_at.map(|at| {
            self.config
                .cooldown
                .saturating_sub(now.saturating_duration_since(at))
        })
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
        if self.state == CircuitState::HalfOpen
            && self.consecutive_successes >= self.config.success_threshold
        {
            self.close();
            tracing::info!(agent = self.agent, "Circuit closed");
        }
    }

    /// Record a failed call at `now`.
    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;
        let trip = match self.state {
            CircuitState::Closed => self.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
            self.trips += 1;
            tracing::warn!(
                agent = self.agent,
                failures = self.consecutive_failures,
                "Circuit opened"
            );
        }
    }

    /// Force the breaker closed.
    pub fn reset(&mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.opened_at = None;
    }
}
