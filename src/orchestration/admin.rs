//! Operator overrides: escalate, resolve manually, or return to origin.
//!
//! Overrides go through the same compare-and-set path as every other writer
//! and leave an escalation record or audit action naming the operator.

use super::queue::{ResolutionQueue, ResolutionTask};
use crate::constants::operations;
use crate::error::{NdrError, Result};
use crate::logging::log_event_operation;
use crate::models::{ActionOutcome, ActionType, Actor, NdrEvent, ResolutionAction};
use crate::services::Clock;
use crate::state_machine::{NdrStateMachine, NdrStatus, NdrTransition, StateMachineError};
use crate::store::{EventMutator, Mutation};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AdminOverrides {
    mutator: EventMutator,
    queue: ResolutionQueue,
    clock: Arc<dyn Clock>,
}

impl AdminOverrides {
    pub fn new(mutator: EventMutator, queue: ResolutionQueue, clock: Arc<dyn Clock>) -> Self {
        Self { mutator, queue, clock }
    }

    /// Move a live event to `escalated`
    pub async fn escalate(&self, event_id: Uuid, reason: &str, operator: &str) -> Result<NdrEvent> {
        let event = self
            .force(event_id, NdrTransition::escalate(reason), operator, None)
            .await?;
        self.queue.dispatch(ResolutionTask::escalated(event_id));
        Ok(event)
    }

    /// Seller decision on an `escalated` event: move it to `rto_triggered` and queue the carrier return
    pub async fn trigger_rto(&self, event_id: Uuid, reason: &str, operator: &str) -> Result<NdrEvent> {
        let event = self
            .force(
                event_id,
                NdrTransition::trigger_rto(reason),
                operator,
                Some(NdrStatus::Escalated),
            )
            .await?;
        self.queue.dispatch(ResolutionTask::return_to_origin(event_id));
        Ok(event)
    }

    /// Close an `escalated` event as `resolved` after the operator settled it out of band
    pub async fn resolve_manually(&self, event_id: Uuid, note: &str, operator: &str) -> Result<NdrEvent> {
        let now = self.clock.now();
        let outcome = self
            .mutator
            .mutate(event_id, |event| {
                reject_terminal(event)?;
                NdrStateMachine::apply(event, &NdrTransition::ResolveManually, now)?;
                event.push_action(
                    ResolutionAction::new(
                        ActionType::Resolved,
                        event.attempt_number,
                        Actor::System,
                        ActionOutcome::Success,
                        now,
                    )
                    .with_metadata(json!({ "note": note, "resolved_by": operator })),
                );
                Ok(Mutation::Write(()))
            })
            .await?;

        info!(event_id = %event_id, operator = operator, "Event resolved manually");
        log_event_operation(
            operations::EVENT_RESOLVED,
            event_id,
            &outcome.event.shipment_reference,
            outcome.event.status.as_str(),
            Some(note),
        );
        Ok(outcome.event)
    }

    async fn force(
        &self,
        event_id: Uuid,
        transition: NdrTransition,
        operator: &str,
        required_status: Option<NdrStatus>,
    ) -> Result<NdrEvent> {
        let now = self.clock.now();
        let initiator = format!("admin:{operator}");
        let outcome = self
            .mutator
            .mutate(event_id, |event| {
                reject_terminal(event)?;
                let allowed_from = required_status.map_or(true, |status| event.status == status);
                if !allowed_from || !NdrStateMachine::can_apply(event, &transition) {
                    return Err(StateMachineError::InvalidTransition {
                        from: event.status,
                        event: transition.event_type().to_string(),
                    }
                    .into());
                }
                NdrStateMachine::force(event, transition.clone(), &initiator, now)?;
                Ok(Mutation::Write(()))
            })
            .await?;

        log_event_operation(
            operations::EVENT_ESCALATED,
            event_id,
            &outcome.event.shipment_reference,
            outcome.event.status.as_str(),
            transition.reason(),
        );
        Ok(outcome.event)
    }
}

fn reject_terminal(event: &NdrEvent) -> Result<()> {
    if event.is_terminal() {
        return Err(NdrError::EventAlreadyTerminal {
            event_id: event.event_id,
            status: event.status,
        });
    }
    Ok(())
}
