//! Per provider and data kind failure tracking
//!
//! A breaker opens after `failure_threshold` consecutive failures, stays open
//! for `cooldown`, then lets exactly one probe through. The probe's outcome
//! either closes the circuit or reopens it with a fresh cooldown.
//!
//! Callers that may finish after the circuit changed state go through
//! [`CircuitBreaker::admit`] and [`CircuitBreaker::settle`]: each opening
//! starts a new generation, and outcomes from an older generation are dropped
//! so a slow call admitted while closed cannot close a half-open circuit.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Runtime circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Outcome of one guarded call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// The call never reached the provider; only releases a held probe
    Skipped,
}

/// Health record owned by one breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderHealth {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub probe_in_flight: bool,
    /// Number of times the circuit has opened
    pub generation: u64,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
            generation: 0,
        }
    }
}

impl ProviderHealth {
    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.probe_in_flight = false;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Ticket for one call let through by [`CircuitBreaker::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    generation: u64,
    probe: bool,
}

impl Admission {
    /// Whether this call holds the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

/// Thread-safe circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<ProviderHealth>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(ProviderHealth::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProviderHealth> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may go through now.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and
    /// grants the single probe to this caller.
    pub fn allow(&self) -> bool {
        self.admit().is_some()
    }

    /// Like [`allow`](Self::allow), returning a ticket to hand back to
    /// [`settle`](Self::settle) with the call's outcome.
    pub fn admit(&self) -> Option<Admission> {
        let mut inner = self.lock();
        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return None;
                }
                true
            }
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.config.cooldown);
                if !cooled {
                    return None;
                }
                debug!(breaker = %self.name, "Cooldown elapsed, allowing probe");
                inner.state = CircuitState::HalfOpen;
                true
            }
        };
        if probe {
            inner.probe_in_flight = true;
        }
        Some(Admission {
            generation: inner.generation,
            probe,
        })
    }

    /// Record the outcome of an admitted call.
    ///
    /// Outcomes of calls admitted before the circuit last opened are ignored.
    pub fn settle(&self, admission: Admission, outcome: CallOutcome) {
        let mut inner = self.lock();
        if admission.generation != inner.generation {
            debug!(
                breaker = %self.name,
                ?outcome,
                "Ignoring outcome of a call admitted before the circuit opened"
            );
            return;
        }
        self.apply(&mut inner, outcome);
    }

    /// Record the outcome of a call that `allow()` let through
    pub fn record(&self, outcome: CallOutcome) {
        let mut inner = self.lock();
        self.apply(&mut inner, outcome);
    }

    fn apply(&self, inner: &mut ProviderHealth, outcome: CallOutcome) {
        match (inner.state, outcome) {
            (_, CallOutcome::Skipped) => {
                inner.probe_in_flight = false;
            }
            (CircuitState::HalfOpen, CallOutcome::Success) => {
                info!(breaker = %self.name, "Probe succeeded, circuit closed");
                *inner = ProviderHealth {
                    generation: inner.generation,
                    ..ProviderHealth::default()
                };
            }
            (CircuitState::HalfOpen, CallOutcome::Failure) => {
                warn!(breaker = %self.name, "Probe failed, circuit reopened");
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.open();
            }
            (CircuitState::Closed, CallOutcome::Success) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::Closed, CallOutcome::Failure) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "Circuit opened"
                    );
                    inner.open();
                }
            }
            // Late results from calls admitted before the circuit opened
            (CircuitState::Open, CallOutcome::Failure) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            }
            (CircuitState::Open, CallOutcome::Success) => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> ProviderHealth {
        *self.lock()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
