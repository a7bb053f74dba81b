//! Per-task circuit breaker with open → half-open → closed recovery.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker thresholds for one task.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// Cooldown before a half-open probe is permitted.
    pub reset: Duration,
    /// Probes permitted per half-open window.
    pub half_open_retries: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            reset: Duration::from_secs(60),
            half_open_retries: 1,
        }
    }
}

/// Breaker state, reported in task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Failures below threshold; attempts permitted.
    Closed,
    /// Threshold reached; attempts skipped until the cooldown elapses.
    Open,
    /// Cooldown elapsed; a bounded number of probes permitted.
    HalfOpen,
}

/// Consecutive-failure gate for one scheduled task.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_probes: u32,
}

impl CircuitBreaker {
    /// A closed breaker with the given thresholds.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_probes: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures so far.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether an attempt may run at `now`, advancing open → half-open when
    /// the cooldown has elapsed.
    pub fn should_attempt(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| now.duration_since(at) >= self.config.reset)
                    .unwrap_or(true);
                if elapsed {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_probes = 0;
                    return self.take_probe();
                }
                false
            }
            CircuitState::HalfOpen => self.take_probe(),
        }
    }

    fn take_probe(&mut self) -> bool {
        if self.half_open_probes < self.config.half_open_retries {
            self.half_open_probes += 1;
            true
        } else {
            false
        }
    }

    /// A run succeeded: close the circuit.
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.half_open_probes = 0;
    }

    /// A run failed at `now`. Returns true when this failure opened (or
    /// re-opened) the circuit.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures += 1;
        match self.state {
            // A failed half-open probe goes straight back to open.
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                true
            }
            CircuitState::Closed if self.consecutive_failures >= self.config.max_failures => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Operator reset: clear failures and close.
    pub fn reset(&mut self) {
        self.record_success();
    }
}
