//! # Customer Action Handler
//!
//! Token-gated self-service for the customer: view the non-delivery, then
//! update the address, reschedule, or cancel.
//!
//! The three actions are mutually exclusive per attempt. The decision is
//! claimed with a compare-and-set write *before* any external call, so two
//! concurrent actions cannot both reach the carrier. The customer is waiting
//! on the response, so carrier and order calls run inline and their outcomes
//! are appended to the event once they complete.

use crate::config::EngineConfig;
use crate::constants::operations;
use crate::error::{NdrError, Result};
use crate::logging::log_event_operation;
use crate::models::{
    ActionOutcome, ActionType, Actor, DeliveryAddress, EventSummary, NdrEvent, ResolutionAction,
    RescheduleWindow, TimeSlot,
};
use crate::orchestration::{ResolutionQueue, ResolutionTask};
use crate::resilience::CarrierCommandError;
use crate::services::{
    CarrierAck, Clock, OrderCommands, OrderReadModel, ProtectedCarrierCommands, ReattemptParams,
    ShipmentInfo,
};
use crate::state_machine::{CustomerDecisionGuard, GuardError, NdrStateMachine, NdrTransition, StateGuard};
use crate::store::{EventMutator, Mutation};
use crate::tokens::CapabilityTokenService;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Action submitted from the resolution page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CustomerAction {
    UpdateAddress {
        address: DeliveryAddress,
    },
    Reschedule {
        preferred_date: NaiveDate,
        time_slot: TimeSlot,
    },
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl CustomerAction {
    fn decision(&self) -> (ActionType, NdrTransition) {
        match self {
            Self::UpdateAddress { .. } => (ActionType::AddressUpdated, NdrTransition::CustomerDecision),
            Self::Reschedule { .. } => (ActionType::Rescheduled, NdrTransition::CustomerDecision),
            Self::Cancel { .. } => (ActionType::CancelledByCustomer, NdrTransition::CustomerCancel),
        }
    }

    fn metadata(&self) -> Value {
        match self {
            Self::UpdateAddress { address } => json!({ "address": address }),
            Self::Reschedule {
                preferred_date,
                time_slot,
            } => json!({ "preferred_date": preferred_date, "time_slot": time_slot }),
            Self::Cancel { reason } => json!({ "reason": reason }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

impl ActionResponse {
    fn ok(message: impl Into<String>, next_step: Option<&str>) -> Self {
        Self {
            success: true,
            message: message.into(),
            next_step: next_step.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CustomerActionHandler {
    tokens: CapabilityTokenService,
    mutator: EventMutator,
    orders: Arc<dyn OrderReadModel>,
    order_commands: Arc<dyn OrderCommands>,
    carrier: ProtectedCarrierCommands,
    queue: ResolutionQueue,
    clock: Arc<dyn Clock>,
    engine: EngineConfig,
    collaborator_timeout: std::time::Duration,
}

impl CustomerActionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tokens: CapabilityTokenService,
        mutator: EventMutator,
        orders: Arc<dyn OrderReadModel>,
        order_commands: Arc<dyn OrderCommands>,
        carrier: ProtectedCarrierCommands,
        queue: ResolutionQueue,
        clock: Arc<dyn Clock>,
        engine: EngineConfig,
        collaborator_timeout: std::time::Duration,
    ) -> Self {
        Self {
            tokens,
            mutator,
            orders,
            order_commands,
            carrier,
            queue,
            clock,
            engine,
            collaborator_timeout,
        }
    }

    /// Sanitized summary for the resolution page.
    ///
    /// A terminal event is not an error here: the customer sees how it concluded.
    /// Expired and forged tokens still fail.
    pub async fn view(&self, token: &str) -> Result<EventSummary> {
        let now = self.clock.now();
        let claims = self.tokens.decode(token, now)?;
        let event = self
            .mutator
            .store()
            .get(claims.eid)
            .await?
            .ok_or_else(|| NdrError::TokenInvalid {
                reason: "token refers to an unknown event".to_string(),
            })?;
        Ok(EventSummary::from_event(&event, Some(self.reschedule_window())))
    }

    /// Dates a reschedule may pick: tomorrow through the configured window
    pub fn reschedule_window(&self) -> RescheduleWindow {
        let today = self.clock.now().date_naive();
        RescheduleWindow {
            earliest: today + Duration::days(1),
            latest: today + self.engine.reschedule_window(),
        }
    }

    pub async fn submit(&self, token: &str, action: CustomerAction) -> Result<ActionResponse> {
        let now = self.clock.now();
        let verified = self.tokens.verify(token, now).await?;
        self.validate(&action)?;

        let event = self.claim_decision(verified.event, &action, verified.claims.tid).await?;

        match action {
            CustomerAction::UpdateAddress { address } => self.apply_address_update(&event, &address).await,
            CustomerAction::Reschedule {
                preferred_date,
                time_slot,
            } => self.apply_reschedule(&event, preferred_date, time_slot).await,
            CustomerAction::Cancel { reason } => {
                let reason = reason.unwrap_or_else(|| "cancelled by customer".to_string());
                self.apply_cancellation(&event, &reason).await
            }
        }
    }

    fn validate(&self, action: &CustomerAction) -> Result<()> {
        match action {
            CustomerAction::UpdateAddress { address } => address.validate().map_err(NdrError::Validation),
            CustomerAction::Reschedule { preferred_date, .. } => {
                let window = self.reschedule_window();
                if *preferred_date < window.earliest || *preferred_date > window.latest {
                    return Err(NdrError::validation(format!(
                        "preferred_date must be between {} and {}",
                        window.earliest, window.latest
                    )));
                }
                Ok(())
            }
            CustomerAction::Cancel { reason } => match reason {
                Some(reason) if reason.len() > 500 => {
                    Err(NdrError::validation("reason must be at most 500 characters"))
                }
                _ => Ok(()),
            },
        }
    }

    /// Record the customer's decision and move the event, or fail if someone else got there first
    async fn claim_decision(&self, event: NdrEvent, action: &CustomerAction, token_id: Uuid) -> Result<NdrEvent> {
        let now = self.clock.now();
        let (action_type, transition) = action.decision();
        let mut metadata = action.metadata();
        metadata["token_id"] = json!(token_id);

        let outcome = self
            .mutator
            .mutate_from(event, |current| {
                CustomerDecisionGuard.check(current).map_err(|err| match err {
                    GuardError::Terminal { event_id, status } => NdrError::EventAlreadyTerminal { event_id, status },
                    _ => NdrError::AlreadyInResolution {
                        event_id: current.event_id,
                    },
                })?;
                NdrStateMachine::apply(current, &transition, now)?;
                current.push_action(
                    ResolutionAction::new(
                        action_type,
                        current.attempt_number,
                        Actor::Customer,
                        ActionOutcome::Success,
                        now,
                    )
                    .with_metadata(metadata.clone()),
                );
                Ok(Mutation::Write(()))
            })
            .await?;

        log_event_operation(
            operations::CUSTOMER_ACTION,
            outcome.event.event_id,
            &outcome.event.shipment_reference,
            outcome.event.status.as_str(),
            Some(action_type.as_str()),
        );
        Ok(outcome.event)
    }

    async fn apply_address_update(&self, event: &NdrEvent, address: &DeliveryAddress) -> Result<ActionResponse> {
        if let Some(info) = self.lookup_shipment(event).await? {
            let applied = tokio::time::timeout(
                self.collaborator_timeout,
                self.order_commands.apply_address(&info.order_id, address),
            )
            .await;
            let (result, metadata) = collaborator_outcome(applied, &self.collaborator_timeout);
            let mut metadata = metadata;
            metadata["target"] = json!("order");
            metadata["order_id"] = json!(info.order_id);
            self.append(event, self.system_action(ActionType::AddressUpdated, event, result).with_metadata(metadata))
                .await?;
        }

        let carrier = async {
            let updated = self
                .carrier
                .update_delivery_address(&event.carrier_id, &event.shipment_reference, address)
                .await?;
            let requested = self
                .carrier
                .request_reattempt(
                    &event.carrier_id,
                    &event.shipment_reference,
                    &ReattemptParams::with_address(address.clone()),
                )
                .await?;
            Ok::<_, CarrierCommandError>((updated, requested))
        }
        .await;

        let scheduled = self
            .record_reattempt(event, carrier.map(|(_, requested)| requested))
            .await?;
        Ok(if scheduled {
            ActionResponse::ok(
                "Your address has been updated and a new delivery attempt is being arranged",
                Some("await_delivery"),
            )
        } else {
            ActionResponse::ok(
                "Your address has been saved. The seller will arrange the next delivery attempt",
                Some("seller_follow_up"),
            )
        })
    }

    async fn apply_reschedule(&self, event: &NdrEvent, date: NaiveDate, slot: TimeSlot) -> Result<ActionResponse> {
        let requested = self
            .carrier
            .request_reattempt(
                &event.carrier_id,
                &event.shipment_reference,
                &ReattemptParams::scheduled(date, slot),
            )
            .await;

        let scheduled = self.record_reattempt(event, requested).await?;
        Ok(if scheduled {
            ActionResponse::ok(format!("Delivery rescheduled for {date} ({slot})"), Some("await_delivery"))
        } else {
            ActionResponse::ok(
                format!("Your preference for {date} ({slot}) has been saved. The seller will confirm the delivery"),
                Some("seller_follow_up"),
            )
        })
    }

    async fn apply_cancellation(&self, event: &NdrEvent, reason: &str) -> Result<ActionResponse> {
        let mut refund_requested = false;

        if let Some(info) = self.lookup_shipment(event).await? {
            let cancelled = tokio::time::timeout(
                self.collaborator_timeout,
                self.order_commands.cancel_order(&info.order_id, reason),
            )
            .await;
            let (result, metadata) = collaborator_outcome(cancelled, &self.collaborator_timeout);
            self.append(event, self.system_action(ActionType::OrderCancelled, event, result).with_metadata(metadata))
                .await?;

            if info.prepaid {
                let refund = tokio::time::timeout(
                    self.collaborator_timeout,
                    self.order_commands.request_refund(&info.order_id, reason),
                )
                .await;
                let (result, metadata) = collaborator_outcome(refund, &self.collaborator_timeout);
                refund_requested = result == ActionOutcome::Success;
                self.append(event, self.system_action(ActionType::RefundRequested, event, result).with_metadata(metadata))
                    .await?;
            }
        }

        self.queue.dispatch(ResolutionTask::return_to_origin(event.event_id));

        let message = if refund_requested {
            "Your order has been cancelled and a refund has been requested"
        } else {
            "Your order has been cancelled"
        };
        Ok(ActionResponse::ok(message, refund_requested.then_some("refund_pending")))
    }

    async fn lookup_shipment(&self, event: &NdrEvent) -> Result<Option<ShipmentInfo>> {
        let lookup = tokio::time::timeout(
            self.collaborator_timeout,
            self.orders.shipment_info(&event.shipment_reference),
        )
        .await;
        let error = match lookup {
            Ok(Ok(Some(info))) => return Ok(Some(info)),
            Ok(Ok(None)) => "shipment not found in order read model".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => "shipment lookup timed out".to_string(),
        };
        warn!(event_id = %event.event_id, error = %error, "Shipment lookup failed during customer action");
        self.append(
            event,
            self.system_action(ActionType::ShipmentLookup, event, ActionOutcome::Failed)
                .with_metadata(json!({ "error": error })),
        )
        .await?;
        Ok(None)
    }

    /// Append the reattempt outcome. Returns whether the carrier accepted it.
    async fn record_reattempt(
        &self,
        event: &NdrEvent,
        result: std::result::Result<CarrierAck, CarrierCommandError>,
    ) -> Result<bool> {
        let action = match &result {
            Ok(ack) => self.system_action(ActionType::ReattemptRequested, event, ActionOutcome::Success)
                .with_metadata(json!({ "carrier_reference": ack.reference })),
            Err(err) => {
                warn!(
                    event_id = %event.event_id,
                    command = %err.command(),
                    error = %err,
                    "Carrier rejected customer-requested reattempt"
                );
                self.system_action(ActionType::ReattemptRequested, event, ActionOutcome::Failed)
                    .with_metadata(json!({ "command": err.command().to_string(), "error": err.to_string() }))
            }
        };
        self.append(event, action).await?;
        if result.is_ok() {
            info!(event_id = %event.event_id, "Customer-requested reattempt accepted by carrier");
        }
        Ok(result.is_ok())
    }

    fn system_action(&self, action_type: ActionType, event: &NdrEvent, result: ActionOutcome) -> ResolutionAction {
        ResolutionAction::new(action_type, event.attempt_number, Actor::System, result, self.clock.now())
    }

    async fn append(&self, event: &NdrEvent, action: ResolutionAction) -> Result<()> {
        self.mutator
            .mutate(event.event_id, |current| {
                current.push_action(action.clone());
                Ok(Mutation::Write(()))
            })
            .await?;
        Ok(())
    }
}

fn collaborator_outcome<E: std::fmt::Display>(
    outcome: std::result::Result<std::result::Result<(), E>, tokio::time::error::Elapsed>,
    timeout: &std::time::Duration,
) -> (ActionOutcome, Value) {
    match outcome {
        Ok(Ok(())) => (ActionOutcome::Success, json!({})),
        Ok(Err(e)) => (ActionOutcome::Failed, json!({ "error": e.to_string() })),
        Err(_) => (
            ActionOutcome::Failed,
            json!({ "error": format!("timed out after {}ms", timeout.as_millis()) }),
        ),
    }
}
