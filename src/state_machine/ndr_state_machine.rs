use super::{
    errors::{StateMachineError, StateMachineResult},
    events::NdrTransition,
    states::NdrStatus,
};
use crate::models::{ActionOutcome, ActionType, Actor, EscalationRecord, NdrEvent, ResolutionAction};
use chrono::{DateTime, Utc};
use serde_json::json;

/// Result of applying a transition to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedTransition {
    pub from: NdrStatus,
    pub to: NdrStatus,
}

impl AppliedTransition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Transition table for the NDR lifecycle.
///
/// Stateless: the event record itself is the state, and persistence of the mutated
/// record goes through the store's compare-and-set.
pub struct NdrStateMachine;

impl NdrStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current: NdrStatus,
        event: &NdrTransition,
    ) -> StateMachineResult<NdrStatus> {
        use NdrStatus::*;

        let target = match (current, event) {
            (from, _) if from.is_terminal() => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.event_type().to_string(),
                })
            }

            (Detected, NdrTransition::BeginResolution) => InResolution,

            (Detected | InResolution, NdrTransition::AwaitCustomer) => CustomerActionRequired,

            (Detected | InResolution | CustomerActionRequired, NdrTransition::CustomerDecision) => {
                InResolution
            }
            (Detected | InResolution | CustomerActionRequired, NdrTransition::CustomerCancel) => {
                RtoTriggered
            }

            // The only sanctioned revert: a new carrier attempt restarts the cycle
            (Detected | InResolution | CustomerActionRequired, NdrTransition::NewAttempt) => Detected,
            (Escalated, NdrTransition::NewAttempt) => Escalated,

            (_, NdrTransition::ConfirmDelivered) => Resolved,

            (Detected | InResolution | CustomerActionRequired, NdrTransition::Escalate(_)) => {
                Escalated
            }

            (_, NdrTransition::TriggerRto(_)) => RtoTriggered,
            (Escalated, NdrTransition::ResolveManually) => Resolved,

            (from, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply a transition to the in-memory record
    pub fn apply(
        event: &mut NdrEvent,
        transition: &NdrTransition,
        now: DateTime<Utc>,
    ) -> StateMachineResult<AppliedTransition> {
        let from = event.status;
        if from.is_terminal() {
            return Err(StateMachineError::AlreadyTerminal {
                event_id: event.event_id,
                status: from,
            });
        }

        let to = Self::determine_target_state(from, transition)?;
        event.status = to;
        event.updated_at = now;
        if to.is_terminal() {
            event.resolved_at = Some(now);
        }

        Ok(AppliedTransition { from, to })
    }

    /// Check whether a transition would be accepted without mutating anything
    pub fn can_apply(event: &NdrEvent, transition: &NdrTransition) -> bool {
        !event.is_terminal() && Self::determine_target_state(event.status, transition).is_ok()
    }

    /// Force a policy transition (`escalated` or `rto_triggered`) and write the escalation record
    pub fn force(
        event: &mut NdrEvent,
        transition: NdrTransition,
        actor: &str,
        now: DateTime<Utc>,
    ) -> StateMachineResult<AppliedTransition> {
        let reason = transition.reason().unwrap_or_default().to_string();
        let action_type = match transition {
            NdrTransition::Escalate(_) => ActionType::Escalated,
            NdrTransition::TriggerRto(_) => ActionType::RtoTriggered,
            ref other => {
                return Err(StateMachineError::GuardFailed {
                    reason: format!("{} is not a policy transition", other.event_type()),
                })
            }
        };

        let applied = Self::apply(event, &transition, now)?;
        event.escalations.push(EscalationRecord {
            reason: reason.clone(),
            triggered_at: now,
            previous_status: applied.from,
            new_status: applied.to,
            attempt_number: event.attempt_number,
            actor: actor.to_string(),
        });
        event.push_action(
            ResolutionAction::new(
                action_type,
                event.attempt_number,
                Actor::System,
                ActionOutcome::Success,
                now,
            )
            .with_metadata(json!({
                "reason": reason,
                "previous_status": applied.from,
                "initiated_by": actor,
            })),
        );

        Ok(applied)
    }
}
