//! Bounded timeout + retry with exponential backoff for carrier commands.
//!
//! Each try runs under the per-try timeout and through the carrier's circuit
//! breaker. An open circuit fails fast without consuming the retry budget.

use crate::resilience::{CircuitBreaker, CircuitBreakerError, RetryConfig};
use crate::services::ServiceError;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};

/// Abstract carrier commands the engine emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CarrierCommand {
    RequestReattempt,
    RequestCancel,
    UpdateDeliveryAddress,
}

impl CarrierCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestReattempt => "request_reattempt",
            Self::RequestCancel => "request_cancel",
            Self::UpdateDeliveryAddress => "update_delivery_address",
        }
    }
}

impl fmt::Display for CarrierCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum CarrierCommandError {
    #[error("{command} rejected by carrier: {reason}")]
    Rejected { command: CarrierCommand, reason: String },

    #[error("{command} gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        command: CarrierCommand,
        attempts: u32,
        last_error: String,
    },

    #[error("{command} not sent, circuit open for carrier {carrier}")]
    CircuitOpen {
        command: CarrierCommand,
        carrier: String,
    },
}

impl CarrierCommandError {
    pub fn command(&self) -> CarrierCommand {
        match self {
            Self::Rejected { command, .. }
            | Self::Exhausted { command, .. }
            | Self::CircuitOpen { command, .. } => *command,
        }
    }

    /// Whether the same command may succeed if sent again later
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, is rejected outright, or the budget is spent
    pub async fn run<T, F, Fut>(
        &self,
        command: CarrierCommand,
        breaker: Option<&CircuitBreaker>,
        mut operation: F,
    ) -> Result<T, CarrierCommandError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let timeout = self.config.timeout();
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.backoff_for(attempt - 1)).await;
            }

            let call = operation();
            let timed = async move {
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ServiceError::Timeout(timeout.as_millis() as u64)),
                }
            };

            // Err(Err(carrier)) is an open circuit, Err(Ok(e)) a failed call
            let outcome = match breaker {
                Some(breaker) => breaker.call(|| timed).await.map_err(|err| match err {
                    CircuitBreakerError::CircuitOpen { carrier } => Err(carrier),
                    CircuitBreakerError::OperationFailed(inner) => Ok(inner),
                }),
                None => timed.await.map_err(Ok),
            };

            match outcome {
                Ok(value) => {
                    debug!(command = %command, attempt = attempt, "Carrier command accepted");
                    return Ok(value);
                }
                Err(Err(carrier)) => {
                    return Err(CarrierCommandError::CircuitOpen { command, carrier });
                }
                Err(Ok(err)) if !err.is_retryable() => {
                    warn!(command = %command, attempt = attempt, error = %err, "Carrier command rejected");
                    return Err(CarrierCommandError::Rejected {
                        command,
                        reason: err.to_string(),
                    });
                }
                Err(Ok(err)) => {
                    warn!(
                        command = %command,
                        attempt = attempt,
                        max_attempts = self.config.max_attempts,
                        error = %err,
                        "Carrier command failed"
                    );
                    last_error = err.to_string();
                }
            }
        }

        Err(CarrierCommandError::Exhausted {
            command,
            attempts: self.config.max_attempts,
            last_error,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            timeout_ms: 50,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
        })
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run(CarrierCommand::RequestReattempt, None, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ServiceError::Unavailable("503".to_string()))
                } else {
                    Ok("ack")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ack");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_after_budget() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(2)
            .run(CarrierCommand::RequestCancel, None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ServiceError::Unavailable("503".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CarrierCommandError::Exhausted { attempts: 2, .. }));
        assert_eq!(err.command(), CarrierCommand::RequestCancel);
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let err = fast_policy(2)
            .run(CarrierCommand::RequestReattempt, None, || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, ServiceError>(())
            })
            .await
            .unwrap_err();

        match err {
            CarrierCommandError::Exhausted { last_error, .. } => {
                assert!(last_error.contains("timed out"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(3)
            .run(CarrierCommand::UpdateDeliveryAddress, None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ServiceError::Rejected("pincode not serviceable".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CarrierCommandError::Rejected { .. }));
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let breaker = CircuitBreaker::new("x".to_string(), CircuitBreakerConfig::default());
        breaker.force_open();

        let calls = AtomicU32::new(0);
        let err = fast_policy(3)
            .run(CarrierCommand::RequestReattempt, Some(&breaker), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ServiceError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CarrierCommandError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
