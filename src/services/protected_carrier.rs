//! # Protected Carrier Commands
//!
//! Wraps a [`CarrierCommands`] implementation with the per-carrier circuit
//! breaker and the bounded retry policy. Every carrier command the engine
//! issues goes through here.

use super::carrier::{CarrierAck, CarrierCommands, ReattemptParams};
use crate::models::DeliveryAddress;
use crate::resilience::{CarrierCircuitBreakers, CarrierCommand, CarrierCommandError, RetryPolicy};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ProtectedCarrierCommands {
    inner: Arc<dyn CarrierCommands>,
    breakers: Arc<CarrierCircuitBreakers>,
    retry: RetryPolicy,
}

impl ProtectedCarrierCommands {
    pub fn new(
        inner: Arc<dyn CarrierCommands>,
        breakers: Arc<CarrierCircuitBreakers>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner,
            breakers,
            retry,
        }
    }

    pub fn breakers(&self) -> &Arc<CarrierCircuitBreakers> {
        &self.breakers
    }

    pub async fn request_reattempt(
        &self,
        carrier_id: &str,
        shipment_reference: &str,
        params: &ReattemptParams,
    ) -> Result<CarrierAck, CarrierCommandError> {
        self.protected(CarrierCommand::RequestReattempt, carrier_id, move || {
            self.inner
                .request_reattempt(carrier_id, shipment_reference, params)
        })
        .await
    }

    pub async fn request_cancel(
        &self,
        carrier_id: &str,
        shipment_reference: &str,
    ) -> Result<CarrierAck, CarrierCommandError> {
        self.protected(CarrierCommand::RequestCancel, carrier_id, move || {
            self.inner.request_cancel(carrier_id, shipment_reference)
        })
        .await
    }

    pub async fn update_delivery_address(
        &self,
        carrier_id: &str,
        shipment_reference: &str,
        address: &DeliveryAddress,
    ) -> Result<CarrierAck, CarrierCommandError> {
        self.protected(CarrierCommand::UpdateDeliveryAddress, carrier_id, move || {
            self.inner
                .update_delivery_address(carrier_id, shipment_reference, address)
        })
        .await
    }

    async fn protected<F, Fut>(
        &self,
        command: CarrierCommand,
        carrier_id: &str,
        operation: F,
    ) -> Result<CarrierAck, CarrierCommandError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<CarrierAck, crate::services::ServiceError>>,
    {
        if self.breakers.is_enabled() {
            let breaker = self.breakers.for_carrier(carrier_id);
            self.retry.run(command, Some(&breaker), operation).await
        } else {
            self.retry.run(command, None, operation).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, RetryConfig};
    use crate::test_helpers::RecordingCarrier;

    fn protected(carrier: Arc<RecordingCarrier>, failure_threshold: u32) -> ProtectedCarrierCommands {
        let breakers = Arc::new(CarrierCircuitBreakers::new(CircuitBreakerConfig {
            failure_threshold,
            ..CircuitBreakerConfig::default()
        }));
        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: 2,
            timeout_ms: 100,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
        });
        ProtectedCarrierCommands::new(carrier, breakers, retry)
    }

    #[tokio::test]
    async fn test_commands_reach_carrier() {
        let carrier = Arc::new(RecordingCarrier::new());
        let commands = protected(carrier.clone(), 5);

        commands
            .request_reattempt("X", "S1", &ReattemptParams::default())
            .await
            .unwrap();
        commands.request_cancel("X", "S1").await.unwrap();

        assert_eq!(carrier.calls_for("S1").len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_failures_open_carrier_circuit() {
        let carrier = Arc::new(RecordingCarrier::new());
        carrier.fail_next(2);
        let commands = protected(carrier.clone(), 2);

        let first = commands.request_cancel("X", "S1").await.unwrap_err();
        assert!(matches!(first, CarrierCommandError::Exhausted { .. }));

        let second = commands.request_cancel("X", "S1").await.unwrap_err();
        assert!(matches!(second, CarrierCommandError::CircuitOpen { .. }));
        assert_eq!(commands.breakers().open_carriers(), vec!["x"]);

        // Other carriers are unaffected
        assert!(commands.request_cancel("Y", "S2").await.is_ok());
    }
}
