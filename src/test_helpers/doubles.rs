//! In-process doubles for the external collaborators.
//!
//! Each double records what it was asked to do and can be scripted to fail,
//! so tests assert on side effects without a carrier, notifier or order system.

use crate::models::DeliveryAddress;
use crate::resilience::CarrierCommand;
use crate::services::{
    CarrierAck, CarrierCommands, Contact, Notifier, OrderCommands, OrderReadModel,
    ReattemptParams, ServiceError, ShipmentInfo,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Consume one scripted failure, if any remain
fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierCall {
    pub command: CarrierCommand,
    pub carrier_id: String,
    pub shipment_reference: String,
    pub params: Option<ReattemptParams>,
    pub address: Option<DeliveryAddress>,
}

/// Carrier that acknowledges every command unless told otherwise
#[derive(Debug, Default)]
pub struct RecordingCarrier {
    calls: Mutex<Vec<CarrierCall>>,
    failures: AtomicU32,
    reject_all: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a retryable error
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Reject every call with a non-retryable error
    pub fn reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    /// Sleep before answering, to exercise timeouts
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Every call attempted, including failed ones
    pub fn calls(&self) -> Vec<CarrierCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, shipment_reference: &str) -> Vec<CarrierCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.shipment_reference == shipment_reference)
            .cloned()
            .collect()
    }

    pub fn count(&self, command: CarrierCommand) -> usize {
        self.calls.lock().iter().filter(|call| call.command == command).count()
    }

    async fn answer(&self, call: CarrierCall) -> Result<CarrierAck, ServiceError> {
        let command = call.command;
        self.calls.lock().push(call);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected(format!("{command} not allowed")));
        }
        if take_failure(&self.failures) {
            return Err(ServiceError::Unavailable("carrier API returned 503".to_string()));
        }
        Ok(CarrierAck {
            reference: Some(format!("{command}-ack")),
        })
    }
}

#[async_trait]
impl CarrierCommands for RecordingCarrier {
    async fn request_reattempt(
        &self,
        carrier_id: &str,
        shipment_reference: &str,
        params: &ReattemptParams,
    ) -> Result<CarrierAck, ServiceError> {
        self.answer(CarrierCall {
            command: CarrierCommand::RequestReattempt,
            carrier_id: carrier_id.to_string(),
            shipment_reference: shipment_reference.to_string(),
            params: Some(params.clone()),
            address: None,
        })
        .await
    }

    async fn request_cancel(
        &self,
        carrier_id: &str,
        shipment_reference: &str,
    ) -> Result<CarrierAck, ServiceError> {
        self.answer(CarrierCall {
            command: CarrierCommand::RequestCancel,
            carrier_id: carrier_id.to_string(),
            shipment_reference: shipment_reference.to_string(),
            params: None,
            address: None,
        })
        .await
    }

    async fn update_delivery_address(
        &self,
        carrier_id: &str,
        shipment_reference: &str,
        address: &DeliveryAddress,
    ) -> Result<CarrierAck, ServiceError> {
        self.answer(CarrierCall {
            command: CarrierCommand::UpdateDeliveryAddress,
            carrier_id: carrier_id.to_string(),
            shipment_reference: shipment_reference.to_string(),
            params: None,
            address: Some(address.clone()),
        })
        .await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub contact: Contact,
    pub template: String,
    pub data: Value,
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failures: AtomicU32,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Successfully delivered notifications
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    pub fn sent_with_template(&self, template: &str) -> Vec<SentNotification> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.template == template)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, contact: &Contact, template: &str, data: &Value) -> Result<(), ServiceError> {
        if take_failure(&self.failures) {
            return Err(ServiceError::Unavailable("notification gateway down".to_string()));
        }
        self.sent.lock().push(SentNotification {
            contact: contact.clone(),
            template: template.to_string(),
            data: data.clone(),
        });
        Ok(())
    }
}

/// Order read model backed by a map
#[derive(Debug, Default)]
pub struct StaticOrderBook {
    shipments: DashMap<String, ShipmentInfo>,
    unavailable: AtomicBool,
    lookups: AtomicUsize,
}

impl StaticOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: ShipmentInfo) {
        self.shipments.insert(info.shipment_reference.clone(), info);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `shipment_info` reads served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderReadModel for StaticOrderBook {
    async fn shipment_info(&self, shipment_reference: &str) -> Result<Option<ShipmentInfo>, ServiceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("order service down".to_string()));
        }
        Ok(self
            .shipments
            .get(shipment_reference)
            .map(|entry| entry.value().clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCall {
    ApplyAddress { order_id: String, address: DeliveryAddress },
    Cancel { order_id: String, reason: String },
    Refund { order_id: String, reason: String },
}

#[derive(Debug, Default)]
pub struct RecordingOrderCommands {
    calls: Mutex<Vec<OrderCall>>,
    failures: AtomicU32,
}

impl RecordingOrderCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<OrderCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: OrderCall) -> Result<(), ServiceError> {
        self.calls.lock().push(call);
        if take_failure(&self.failures) {
            return Err(ServiceError::Unavailable("order service down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderCommands for RecordingOrderCommands {
    async fn apply_address(&self, order_id: &str, address: &DeliveryAddress) -> Result<(), ServiceError> {
        self.record(OrderCall::ApplyAddress {
            order_id: order_id.to_string(),
            address: address.clone(),
        })
    }

    async fn cancel_order(&self, order_id: &str, reason: &str) -> Result<(), ServiceError> {
        self.record(OrderCall::Cancel {
            order_id: order_id.to_string(),
            reason: reason.to_string(),
        })
    }

    async fn request_refund(&self, order_id: &str, reason: &str) -> Result<(), ServiceError> {
        self.record(OrderCall::Refund {
            order_id: order_id.to_string(),
            reason: reason.to_string(),
        })
    }
}
