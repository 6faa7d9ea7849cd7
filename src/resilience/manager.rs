//! # Carrier Circuit Breakers
//!
//! Registry of one circuit breaker per carrier. Constructed once and injected
//! into the carrier command path, so tests can hand in their own instance and
//! inspect or force breaker state deterministically.

use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct CarrierCircuitBreakers {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CarrierCircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(
            enabled = config.enabled,
            failure_threshold = config.failure_threshold,
            "Initializing carrier circuit breakers"
        );
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get or create the breaker for a carrier. Carrier ids are case-insensitive.
    pub fn for_carrier(&self, carrier_id: &str) -> Arc<CircuitBreaker> {
        let key = carrier_id.trim().to_lowercase();
        let breaker = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone())));
        Arc::clone(breaker.value())
    }

    pub fn carriers(&self) -> Vec<String> {
        let mut carriers: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        carriers.sort();
        carriers
    }

    pub fn metrics(&self) -> HashMap<String, CircuitBreakerMetrics> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect()
    }

    /// Carriers whose circuit is currently open
    pub fn open_carriers(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .breakers
            .iter()
            .filter(|entry| entry.value().state() == CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect();
        open.sort();
        open
    }

    /// Fraction of carriers whose breaker reports healthy; 1.0 with no carriers
    pub fn health_score(&self) -> f64 {
        let total = self.breakers.len();
        if total == 0 {
            return 1.0;
        }
        let healthy = self
            .breakers
            .iter()
            .filter(|entry| entry.value().metrics().is_healthy())
            .count();
        healthy as f64 / total as f64
    }
}

impl Default for CarrierCircuitBreakers {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_per_carrier() {
        let breakers = CarrierCircuitBreakers::default();
        assert_eq!(breakers.health_score(), 1.0);

        let first = breakers.for_carrier("BlueDart");
        let second = breakers.for_carrier("bluedart");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "bluedart");

        breakers.for_carrier("delhivery");
        assert_eq!(breakers.carriers(), vec!["bluedart", "delhivery"]);
    }

    #[test]
    fn test_open_carriers_reported() {
        let breakers = CarrierCircuitBreakers::default();
        breakers.for_carrier("bluedart").force_open();
        breakers.for_carrier("delhivery");

        assert_eq!(breakers.open_carriers(), vec!["bluedart"]);
        assert_eq!(breakers.health_score(), 0.5);
        assert_eq!(
            breakers.metrics()["bluedart"].current_state,
            CircuitState::Open
        );
    }
}
