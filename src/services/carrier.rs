//! Carrier command abstraction. Wire protocols and carrier authentication are
//! the implementor's concern; the engine only issues these three commands.

use super::ServiceError;
use crate::models::{DeliveryAddress, TimeSlot};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Parameters attached to a reattempt request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReattemptParams {
    pub preferred_date: Option<NaiveDate>,
    pub time_slot: Option<TimeSlot>,
    /// Corrected address, when the reattempt follows an address update
    pub address: Option<DeliveryAddress>,
    pub instructions: Option<String>,
}

impl ReattemptParams {
    pub fn with_address(address: DeliveryAddress) -> Self {
        Self {
            address: Some(address),
            ..Self::default()
        }
    }

    pub fn scheduled(date: NaiveDate, slot: TimeSlot) -> Self {
        Self {
            preferred_date: Some(date),
            time_slot: Some(slot),
            ..Self::default()
        }
    }
}

/// Carrier acknowledgement of an accepted command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierAck {
    /// Carrier-side reference for the request, when the carrier returns one
    pub reference: Option<String>,
}

#[async_trait]
pub trait CarrierCommands: Send + Sync + std::fmt::Debug {
    async fn request_reattempt(
        &self,
        carrier_id: &str,
        shipment_reference: &str,
        params: &ReattemptParams,
    ) -> Result<CarrierAck, ServiceError>;

    async fn request_cancel(
        &self,
        carrier_id: &str,
        shipment_reference: &str,
    ) -> Result<CarrierAck, ServiceError>;

    async fn update_delivery_address(
        &self,
        carrier_id: &str,
        shipment_reference: &str,
        address: &DeliveryAddress,
    ) -> Result<CarrierAck, ServiceError>;
}
