//! # Circuit Breaker
//!
//! Fault isolation for one carrier's command API. Three states: Closed (normal
//! operation), Open (failing fast) and Half-Open (trial calls to test recovery).
//!
//! State lives in an `AtomicU8`; counters sit behind a `parking_lot` mutex that
//! is never held across an await point.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            // Unknown values map to the safest state
            _ => CircuitState::Open,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open for carrier {carrier}")]
    CircuitOpen { carrier: String },

    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

#[derive(Debug)]
struct BreakerInner {
    metrics: CircuitBreakerMetrics,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    /// Carrier id the breaker guards
    name: String,
    state: AtomicU8,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            carrier = %name,
            failure_threshold = config.failure_threshold,
            open_timeout_seconds = config.open_timeout_seconds,
            success_threshold = config.success_threshold,
            "🛡️ Carrier circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            inner: Mutex::new(BreakerInner {
                metrics: CircuitBreakerMetrics::new(),
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.should_allow_call() {
            self.inner.lock().metrics.rejected_count += 1;
            return Err(CircuitBreakerError::CircuitOpen {
                carrier: self.name.clone(),
            });
        }

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(duration),
            Err(_) => self.record_failure(duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    fn should_allow_call(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = self.inner.lock().opened_at;
                match opened_at {
                    Some(opened) if opened.elapsed() >= self.config.open_timeout() => {
                        self.transition_to_half_open();
                        true
                    }
                    Some(_) => false,
                    None => {
                        warn!(carrier = %self.name, "Circuit open but no timestamp recorded");
                        true
                    }
                }
            }
            CircuitState::HalfOpen => {
                self.inner.lock().metrics.half_open_calls < u64::from(self.config.success_threshold)
            }
        }
    }

    fn record_success(&self, duration: Duration) {
        let close = {
            let mut inner = self.inner.lock();
            let metrics = &mut inner.metrics;
            metrics.total_calls += 1;
            metrics.success_count += 1;
            metrics.total_duration += duration;
            metrics.consecutive_failures = 0;

            if self.state() == CircuitState::HalfOpen {
                metrics.half_open_calls += 1;
                metrics.half_open_calls >= u64::from(self.config.success_threshold)
            } else {
                false
            }
        };

        debug!(
            carrier = %self.name,
            duration_ms = duration.as_millis() as u64,
            "🟢 Carrier command succeeded"
        );

        if close {
            self.transition_to_closed();
        }
    }

    fn record_failure(&self, duration: Duration) {
        let open = {
            let mut inner = self.inner.lock();
            let metrics = &mut inner.metrics;
            metrics.total_calls += 1;
            metrics.failure_count += 1;
            metrics.total_duration += duration;
            metrics.consecutive_failures += 1;

            match self.state() {
                CircuitState::Closed => {
                    metrics.consecutive_failures >= u64::from(self.config.failure_threshold)
                }
                // Any failure while testing recovery reopens the circuit
                CircuitState::HalfOpen => true,
                CircuitState::Open => false,
            }
        };

        warn!(
            carrier = %self.name,
            duration_ms = duration.as_millis() as u64,
            "🔴 Carrier command failed"
        );

        if open {
            self.transition_to_open();
        }
    }

    fn transition_to_closed(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        let mut inner = self.inner.lock();
        inner.metrics.consecutive_failures = 0;
        inner.metrics.half_open_calls = 0;
        inner.opened_at = None;

        info!(
            carrier = %self.name,
            total_calls = inner.metrics.total_calls,
            "🟢 Carrier circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        let mut inner = self.inner.lock();
        inner.opened_at = Some(Instant::now());
        inner.metrics.half_open_calls = 0;

        error!(
            carrier = %self.name,
            consecutive_failures = inner.metrics.consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            open_timeout_seconds = self.config.open_timeout_seconds,
            "🔴 Carrier circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self) {
        self.state.store(CircuitState::HalfOpen as u8, Ordering::Release);
        self.inner.lock().metrics.half_open_calls = 0;

        info!(
            carrier = %self.name,
            success_threshold = self.config.success_threshold,
            "🟡 Carrier circuit breaker half-open (testing recovery)"
        );
    }

    /// Force the circuit open, e.g. during a known carrier outage
    pub fn force_open(&self) {
        warn!(carrier = %self.name, "🚨 Carrier circuit breaker forced open");
        self.transition_to_open();
    }

    pub fn force_closed(&self) {
        warn!(carrier = %self.name, "🚨 Carrier circuit breaker forced closed");
        self.transition_to_closed();
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut snapshot = self.inner.lock().metrics.clone();
        snapshot.current_state = self.state();
        snapshot
    }
}
