//! # External Collaborators
//!
//! Interfaces the engine consumes: carrier commands, customer/seller
//! notification, and the order/shipment read model plus the order commands the
//! customer flow triggers. Implementations live outside this crate; the
//! [`crate::test_helpers`] module provides in-process doubles.

pub mod carrier;
pub mod clock;
pub mod notifier;
pub mod orders;
pub mod protected_carrier;

pub use carrier::{CarrierAck, CarrierCommands, ReattemptParams};
pub use clock::{Clock, ManualClock, SystemClock};
pub use notifier::{Contact, Notifier};
pub use orders::{OrderCommands, OrderReadModel, ShipmentInfo};
pub use protected_carrier::ProtectedCarrierCommands;

use thiserror::Error;

/// Failure reported by an external collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// Transient failures worth another try
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}
