//! # NDR Event
//!
//! The canonical non-delivery incident for one shipment. Mutated only through
//! the state machine and the store's compare-and-set; never deleted.

use super::category::NdrCategory;
use super::signal::{CarrierSignal, NormalizedSignal};
use crate::state_machine::NdrStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

/// Who performed a resolution action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    System,
    Customer,
    Carrier,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Customer => write!(f, "customer"),
            Self::Carrier => write!(f, "carrier"),
        }
    }
}

/// Audit trail entry types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Detected,
    ReattemptFailed,
    ResolutionStarted,
    AwaitingCustomer,
    ShipmentLookup,
    TokenIssued,
    CustomerNotified,
    SellerNotified,
    ReattemptRequested,
    AddressUpdated,
    Rescheduled,
    CancelledByCustomer,
    OrderCancelled,
    RefundRequested,
    ReturnRequested,
    Escalated,
    RtoTriggered,
    Resolved,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::ReattemptFailed => "reattempt_failed",
            Self::ResolutionStarted => "resolution_started",
            Self::AwaitingCustomer => "awaiting_customer",
            Self::ShipmentLookup => "shipment_lookup",
            Self::TokenIssued => "token_issued",
            Self::CustomerNotified => "customer_notified",
            Self::SellerNotified => "seller_notified",
            Self::ReattemptRequested => "reattempt_requested",
            Self::AddressUpdated => "address_updated",
            Self::Rescheduled => "rescheduled",
            Self::CancelledByCustomer => "cancelled_by_customer",
            Self::OrderCancelled => "order_cancelled",
            Self::RefundRequested => "refund_requested",
            Self::ReturnRequested => "return_requested",
            Self::Escalated => "escalated",
            Self::RtoTriggered => "rto_triggered",
            Self::Resolved => "resolved",
        }
    }

    /// Actions that represent a customer decision for an attempt
    pub fn is_customer_decision(&self) -> bool {
        matches!(
            self,
            Self::AddressUpdated | Self::Rescheduled | Self::CancelledByCustomer
        )
    }

    /// Actions that carry the key of the carrier signal that produced them
    fn carries_signal_key(&self) -> bool {
        matches!(self, Self::Detected | Self::ReattemptFailed | Self::Resolved)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    Failed,
    Skipped,
}

/// One append-only audit trail record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionAction {
    pub action_type: ActionType,
    /// Attempt number the action belongs to
    pub attempt: u32,
    pub executed_at: DateTime<Utc>,
    pub actor: Actor,
    pub result: ActionOutcome,
    #[serde(default)]
    pub metadata: Value,
}

impl ResolutionAction {
    pub fn new(
        action_type: ActionType,
        attempt: u32,
        actor: Actor,
        result: ActionOutcome,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action_type,
            attempt,
            executed_at,
            actor,
            result,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.result == ActionOutcome::Success
    }

    fn signal_key(&self) -> Option<&str> {
        self.metadata.get("carrier_event_key").and_then(Value::as_str)
    }

    fn carrier_attempt(&self) -> Option<u32> {
        self.metadata
            .get("carrier_attempt")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }
}

/// Appended whenever policy forces a transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub reason: String,
    pub triggered_at: DateTime<Utc>,
    pub previous_status: NdrStatus,
    pub new_status: NdrStatus,
    pub attempt_number: u32,
    pub actor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdrEvent {
    pub event_id: Uuid,
    pub shipment_reference: String,
    pub carrier_id: String,
    /// Key of the signal that created the event
    pub carrier_event_key: String,
    pub category: NdrCategory,
    pub confidence: u8,
    pub raw_reason: String,
    pub needs_manual_review: bool,
    pub status: NdrStatus,
    pub attempt_number: u32,
    pub detected_at: DateTime<Utc>,
    pub resolution_deadline: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_actions: Vec<ResolutionAction>,
    pub escalations: Vec<EscalationRecord>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl NdrEvent {
    /// Build a freshly detected event. The deadline is fixed here and never recomputed.
    pub fn detect(
        signal: &CarrierSignal,
        normalized: &NormalizedSignal,
        signal_key: &str,
        now: DateTime<Utc>,
        resolution_window: Duration,
    ) -> Self {
        let mut event = Self {
            event_id: Uuid::new_v4(),
            shipment_reference: signal.shipment_reference.clone(),
            carrier_id: signal.carrier_id.clone(),
            carrier_event_key: signal_key.to_string(),
            category: normalized.category,
            confidence: normalized.confidence,
            raw_reason: signal.remarks.clone(),
            needs_manual_review: normalized.ambiguous,
            status: NdrStatus::Detected,
            attempt_number: 1,
            detected_at: now,
            resolution_deadline: now + resolution_window,
            resolved_at: None,
            resolution_actions: Vec::new(),
            escalations: Vec::new(),
            version: 1,
            updated_at: now,
        };

        event.push_action(
            ResolutionAction::new(
                ActionType::Detected,
                1,
                Actor::Carrier,
                ActionOutcome::Success,
                now,
            )
            .with_metadata(signal_metadata(signal, signal_key, normalized)),
        );
        event
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.resolution_deadline
    }

    pub fn attempts_exhausted(&self, threshold: u32) -> bool {
        self.attempt_number >= threshold
    }

    pub fn push_action(&mut self, action: ResolutionAction) {
        self.updated_at = action.executed_at.max(self.updated_at);
        self.resolution_actions.push(action);
    }

    /// Whether this exact carrier signal (or the carrier attempt it reports) was already applied
    pub fn has_seen_signal(&self, signal_key: &str, carrier_attempt: Option<u32>) -> bool {
        self.resolution_actions
            .iter()
            .filter(|action| action.action_type.carries_signal_key())
            .any(|action| {
                action.signal_key() == Some(signal_key)
                    || (action.action_type != ActionType::Resolved
                        && carrier_attempt.is_some()
                        && action.carrier_attempt() == carrier_attempt)
            })
    }

    /// Append a distinct failed carrier attempt and bump the counter. Returns the new attempt number.
    pub fn record_failed_attempt(
        &mut self,
        actor: Actor,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> u32 {
        self.attempt_number += 1;
        let attempt = self.attempt_number;
        self.push_action(
            ResolutionAction::new(
                ActionType::ReattemptFailed,
                attempt,
                actor,
                ActionOutcome::Success,
                now,
            )
            .with_metadata(metadata),
        );
        attempt
    }

    pub fn has_action_for_attempt(&self, action_type: ActionType, attempt: u32) -> bool {
        self.resolution_actions
            .iter()
            .any(|action| action.action_type == action_type && action.attempt == attempt)
    }

    pub fn has_succeeded_action_for_attempt(&self, action_type: ActionType, attempt: u32) -> bool {
        self.resolution_actions.iter().any(|action| {
            action.action_type == action_type && action.attempt == attempt && action.succeeded()
        })
    }

    /// Successful customer decision recorded for the current attempt, if any
    pub fn customer_decision(&self) -> Option<&ResolutionAction> {
        self.resolution_actions.iter().rev().find(|action| {
            action.action_type.is_customer_decision()
                && action.attempt == self.attempt_number
                && action.succeeded()
        })
    }

    pub fn actions_of(&self, action_type: ActionType) -> impl Iterator<Item = &ResolutionAction> {
        self.resolution_actions
            .iter()
            .filter(move |action| action.action_type == action_type)
    }

    pub fn last_action(&self) -> Option<&ResolutionAction> {
        self.resolution_actions.last()
    }
}

/// Metadata recorded alongside signal-driven actions
pub fn signal_metadata(
    signal: &CarrierSignal,
    signal_key: &str,
    normalized: &NormalizedSignal,
) -> Value {
    json!({
        "carrier_event_key": signal_key,
        "carrier_attempt": signal.attempt_number,
        "status_code": signal.status_code,
        "remarks": signal.remarks,
        "category": normalized.category,
        "confidence": normalized.confidence,
        "signal_timestamp": signal.timestamp,
    })
}
