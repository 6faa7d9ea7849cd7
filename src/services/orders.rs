//! Order/shipment read model and the order-side commands the customer flow triggers.

use super::notifier::Contact;
use super::ServiceError;
use crate::models::DeliveryAddress;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Read-only view of the order behind a shipment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentInfo {
    pub shipment_reference: String,
    pub order_id: String,
    pub seller_id: String,
    pub customer: Contact,
    pub seller: Contact,
    pub current_address: DeliveryAddress,
    pub prepaid: bool,
}

#[async_trait]
pub trait OrderReadModel: Send + Sync + std::fmt::Debug {
    async fn shipment_info(&self, shipment_reference: &str) -> Result<Option<ShipmentInfo>, ServiceError>;
}

#[async_trait]
pub trait OrderCommands: Send + Sync + std::fmt::Debug {
    /// Record a customer-corrected address against the order
    async fn apply_address(&self, order_id: &str, address: &DeliveryAddress) -> Result<(), ServiceError>;

    async fn cancel_order(&self, order_id: &str, reason: &str) -> Result<(), ServiceError>;

    async fn request_refund(&self, order_id: &str, reason: &str) -> Result<(), ServiceError>;
}
