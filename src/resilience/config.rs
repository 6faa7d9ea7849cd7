//! # Resilience Configuration
//!
//! Serde-facing settings for carrier command protection. Durations are stored
//! as plain integers so they read naturally in TOML and environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-carrier circuit breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,

    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Seconds spent open before a trial call is let through
    pub open_timeout_seconds: u64,

    /// Successful trial calls needed to close again
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    /// Settings suited to third-party carrier APIs
    pub fn for_carrier_api() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            open_timeout_seconds: 30,
            success_threshold: 2,
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.open_timeout_seconds == 0 {
            return Err("open_timeout_seconds must be greater than 0".to_string());
        }

        if self.open_timeout_seconds > 300 {
            return Err("open_timeout_seconds should not exceed 300".to_string());
        }

        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::for_carrier_api()
    }
}

/// Timeout and retry budget for one carrier command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total tries including the first one
    pub max_attempts: u32,

    /// Per-try timeout
    pub timeout_ms: u64,

    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff before retry number `retry` (1-based), capped at `max_backoff_ms`
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.max_attempts > 10 {
            return Err("max_attempts should not exceed 10".to_string());
        }

        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than 0".to_string());
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("initial_backoff_ms must not exceed max_backoff_ms".to_string());
        }

        if self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be at least 1.0".to_string());
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_ms: 5_000,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());

        let mut invalid_config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            open_timeout_seconds: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            success_threshold: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig::default();

        assert_eq!(retry.backoff_for(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(400));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(800));
        assert_eq!(retry.backoff_for(10), Duration::from_millis(2_000));
    }

    #[test]
    fn test_retry_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());

        let inverted = RetryConfig {
            initial_backoff_ms: 5_000,
            max_backoff_ms: 100,
            ..Default::default()
        };
        assert_eq!(
            inverted.validate().unwrap_err(),
            "initial_backoff_ms must not exceed max_backoff_ms"
        );

        let no_attempts = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(no_attempts.validate().is_err());
    }
}
