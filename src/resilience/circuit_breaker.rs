//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: upstream assumed down, calls fail fast without being invoked
//! - Half-Open: a single trial call tests whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= threshold
//! Open → Half-Open: timeout elapsed since the last failure (failures reset)
//! Half-Open → Closed: trial succeeds (failures reset)
//! Half-Open → Open: trial fails and failures >= threshold
//! ```
//!
//! A failed trial below the threshold leaves the breaker half-open and frees
//! the trial slot for the next call. Only the trial call moves the breaker out
//! of half-open; calls admitted while closed that finish later are ignored.
//!
//! A success while closed leaves the failure count untouched, so failures
//! accumulate across intermittent errors until the threshold is reached or
//! the breaker is reset.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::config::{BreakerConfig, BreakersConfig};
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The call was rejected without invoking the protected operation.
    #[error("circuit breaker is open")]
    Open,
    /// The protected operation failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open)
    }

    /// The upstream error, if the operation was actually invoked.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Open => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

/// Point-in-time view of a breaker, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub threshold: u32,
    pub timeout_ms: u64,
    pub last_failure_time: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure_time: u64,
    trial_in_flight: bool,
}

/// A failure-threshold circuit breaker shared by every call to one resource class.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    timeout_ms: u64,
    clock: SharedClock,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker. Zero `threshold` or `timeout` are raised to 1.
    pub fn new(name: impl Into<String>, threshold: u32, timeout: Duration, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            timeout_ms: (timeout.as_millis() as u64).max(1),
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure_time: 0,
                trial_in_flight: false,
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &BreakerConfig, clock: SharedClock) -> Self {
        Self::new(
            name,
            config.threshold,
            Duration::from_millis(config.timeout_ms),
            clock,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` under breaker protection.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let trial = self.admit().ok_or(BreakerError::<E>::Open)?;

        match f().await {
            Ok(value) => {
                self.on_success(trial.armed);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(trial.armed);
                Err(BreakerError::Inner(error))
            }
        }
    }

    /// Force the breaker closed and forget past failures.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.last_failure_time = 0;
        inner.trial_in_flight = false;
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            threshold: self.threshold,
            timeout_ms: self.timeout_ms,
            last_failure_time: inner.last_failure_time,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Option<TrialGuard<'_>> {
        let now = self.clock.now_millis();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            if now.saturating_sub(inner.last_failure_time) >= self.timeout_ms {
                inner.state = CircuitState::HalfOpen;
                inner.failures = 0;
                self.transitioned(CircuitState::HalfOpen);
            } else {
                metrics::record_breaker_rejection(&self.name);
                return None;
            }
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.trial_in_flight {
                metrics::record_breaker_rejection(&self.name);
                return None;
            }
            inner.trial_in_flight = true;
            return Some(TrialGuard {
                breaker: self,
                armed: true,
            });
        }

        Some(TrialGuard {
            breaker: self,
            armed: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && trial {
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            self.transitioned(CircuitState::Closed);
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = self.clock.now_millis();
        let mut inner = self.lock();

        // Admitted while closed but finished after the breaker moved on.
        if !trial && inner.state != CircuitState::Closed {
            tracing::debug!(breaker = %self.name, state = inner.state.as_str(), "Ignoring stale failure");
            return;
        }

        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure_time = now;

        match inner.state {
            CircuitState::HalfOpen if inner.failures >= self.threshold => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failures,
                    threshold = self.threshold,
                    "Circuit breaker reopened"
                );
                self.transitioned(CircuitState::Open);
            }
            CircuitState::Closed if inner.failures >= self.threshold => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failures,
                    threshold = self.threshold,
                    "Circuit breaker opened"
                );
                self.transitioned(CircuitState::Open);
            }
            _ => {}
        }
    }

    fn transitioned(&self, to: CircuitState) {
        tracing::debug!(breaker = %self.name, state = to.as_str(), "Circuit breaker transition");
        metrics::record_breaker_transition(&self.name, to);
    }
}

/// Releases the half-open trial slot even if the trial future is dropped.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

/// Which breaker protects a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerKind {
    Database,
    Api,
}

/// The process-wide breakers, one per protected resource class.
#[derive(Debug, Clone)]
pub struct Breakers {
    pub database: Arc<CircuitBreaker>,
    pub api: Arc<CircuitBreaker>,
}

impl Breakers {
    pub fn from_config(config: &BreakersConfig, clock: SharedClock) -> Self {
        Self {
            database: Arc::new(CircuitBreaker::from_config("database", &config.database, clock.clone())),
            api: Arc::new(CircuitBreaker::from_config("api", &config.api, clock)),
        }
    }

    pub fn get(&self, kind: BreakerKind) -> &Arc<CircuitBreaker> {
        match kind {
            BreakerKind::Database => &self.database,
            BreakerKind::Api => &self.api,
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<CircuitBreaker>> {
        match name {
            "database" => Some(&self.database),
            "api" => Some(&self.api),
            _ => None,
        }
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        vec![self.database.snapshot(), self.api.snapshot()]
    }
}
