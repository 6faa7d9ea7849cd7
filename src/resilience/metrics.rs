//! # Circuit Breaker Metrics
//!
//! Per-carrier call counters, exposed through the health endpoint.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metrics for a single carrier's circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,

    /// Calls rejected without reaching the carrier
    pub rejected_count: u64,

    pub consecutive_failures: u64,

    /// Trial calls made while half-open
    pub half_open_calls: u64,

    pub total_duration: Duration,
    pub current_state: CircuitState,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            consecutive_failures: 0,
            half_open_calls: 0,
            total_duration: Duration::ZERO,
            current_state: CircuitState::Closed,
        }
    }

    /// Failure rate over completed calls (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total_calls as f64
    }

    pub fn average_duration(&self) -> Duration {
        if self.total_calls == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.total_calls.min(u32::MAX as u64) as u32
    }

    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.total_calls < 10 || self.failure_rate() < 0.1,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        }
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_on_empty_metrics() {
        let metrics = CircuitBreakerMetrics::new();
        assert_eq!(metrics.failure_rate(), 0.0);
        assert_eq!(metrics.average_duration(), Duration::ZERO);
        assert!(metrics.is_healthy());
    }

    #[test]
    fn test_health_follows_state_and_failure_rate() {
        let mut metrics = CircuitBreakerMetrics {
            total_calls: 20,
            success_count: 15,
            failure_count: 5,
            ..CircuitBreakerMetrics::new()
        };
        assert!(!metrics.is_healthy());

        metrics.failure_count = 1;
        assert!(metrics.is_healthy());

        metrics.current_state = CircuitState::Open;
        assert!(!metrics.is_healthy());
    }
}
