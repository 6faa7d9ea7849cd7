//! # Resilience Module
//!
//! Fault tolerance for the carrier command path: a bounded per-try timeout,
//! a small number of retries with exponential backoff, and one circuit breaker
//! per carrier held in an injected [`CarrierCircuitBreakers`] registry.
//!
//! ```rust,no_run
//! use ndr_core::resilience::{CarrierCircuitBreakers, CarrierCommand, RetryPolicy};
//! use ndr_core::services::ServiceError;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breakers = CarrierCircuitBreakers::default();
//! let policy = RetryPolicy::default();
//!
//! let breaker = breakers.for_carrier("bluedart");
//! policy
//!     .run(CarrierCommand::RequestCancel, Some(&breaker), || async {
//!         // carrier API call here
//!         Ok::<_, ServiceError>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::{CircuitBreakerConfig, RetryConfig};
pub use manager::CarrierCircuitBreakers;
pub use metrics::CircuitBreakerMetrics;
pub use retry::{CarrierCommand, CarrierCommandError, RetryPolicy};
