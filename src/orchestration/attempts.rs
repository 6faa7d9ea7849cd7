//! Recording a distinct failed delivery attempt on an existing event.
//!
//! Shared by the ingestion path (carrier reports another failure) and the
//! orchestrator (an automatic reattempt request could not be delivered). Both
//! count identically towards the attempt threshold, and the threshold is
//! evaluated in the same write that records the attempt.

use super::queue::ResolutionTask;
use crate::constants::escalation_reasons;
use crate::error::Result;
use crate::governor::EscalationPolicy;
use crate::models::{Actor, NdrEvent};
use crate::state_machine::{NdrStateMachine, NdrStatus, NdrTransition};
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedAttempt {
    pub attempt: u32,
    pub status: NdrStatus,
    /// Status forced by the attempt threshold, if it was reached
    pub forced: Option<NdrStatus>,
}

impl RecordedAttempt {
    /// Side-effect task owed for this attempt
    pub fn follow_up(&self, event_id: uuid::Uuid) -> Option<ResolutionTask> {
        match (self.forced, self.status) {
            (Some(NdrStatus::Escalated), _) => Some(ResolutionTask::escalated(event_id)),
            (Some(NdrStatus::RtoTriggered), _) => Some(ResolutionTask::return_to_origin(event_id)),
            (_, NdrStatus::Detected) => Some(ResolutionTask::start_attempt(event_id, self.attempt)),
            _ => None,
        }
    }
}

/// Append the attempt, revert to `detected` where allowed, and apply the policy
/// transition once the threshold is reached.
pub fn record_new_attempt(
    event: &mut NdrEvent,
    actor: Actor,
    metadata: Value,
    attempt_threshold: u32,
    policy: EscalationPolicy,
    initiator: &str,
    now: DateTime<Utc>,
) -> Result<RecordedAttempt> {
    let attempt = event.record_failed_attempt(actor, metadata, now);
    NdrStateMachine::apply(event, &NdrTransition::NewAttempt, now)?;

    let mut forced = None;
    if event.attempts_exhausted(attempt_threshold) {
        if let Some(transition) =
            policy.transition_for(event.status, escalation_reasons::ATTEMPT_THRESHOLD_REACHED)
        {
            forced = Some(NdrStateMachine::force(event, transition, initiator, now)?.to);
        }
    }

    Ok(RecordedAttempt {
        attempt,
        status: event.status,
        forced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, ClassificationSource, NdrCategory, NormalizedSignal, SignalKind};
    use crate::test_helpers::ndr_signal;
    use serde_json::json;

    fn event() -> NdrEvent {
        let normalized = NormalizedSignal {
            kind: SignalKind::NonDelivery,
            category: NdrCategory::CustomerUnavailable,
            confidence: 75,
            source: ClassificationSource::Keyword,
            ambiguous: false,
        };
        let signal = ndr_signal("X", "S1", "NDR", "door locked", Some(1));
        NdrEvent::detect(&signal, &normalized, "k1", Utc::now(), chrono::Duration::hours(48))
    }

    #[test]
    fn test_second_attempt_restarts_cycle() {
        let mut ndr = event();
        ndr.status = NdrStatus::InResolution;

        let recorded = record_new_attempt(
            &mut ndr,
            Actor::Carrier,
            json!({"carrier_event_key": "k2"}),
            3,
            EscalationPolicy::ManualEscalation,
            "test",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(recorded.attempt, 2);
        assert_eq!(recorded.status, NdrStatus::Detected);
        assert_eq!(recorded.forced, None);
        assert_eq!(
            recorded.follow_up(ndr.event_id),
            Some(ResolutionTask::start_attempt(ndr.event_id, 2))
        );
    }

    #[test]
    fn test_third_attempt_applies_policy_in_same_write() {
        for (policy, expected) in [
            (EscalationPolicy::ManualEscalation, NdrStatus::Escalated),
            (EscalationPolicy::AutoRto, NdrStatus::RtoTriggered),
        ] {
            let mut ndr = event();
            let now = Utc::now();
            record_new_attempt(&mut ndr, Actor::Carrier, json!({}), 3, policy, "test", now).unwrap();
            let recorded =
                record_new_attempt(&mut ndr, Actor::Carrier, json!({}), 3, policy, "test", now).unwrap();

            assert_eq!(recorded.attempt, 3);
            assert_eq!(recorded.forced, Some(expected));
            assert_eq!(ndr.status, expected);
            assert_eq!(ndr.escalations.len(), 1);
            assert_eq!(ndr.escalations[0].reason, "attempt_threshold_reached");
        }
    }

    #[test]
    fn test_escalated_event_stays_escalated_under_manual_policy() {
        let mut ndr = event();
        ndr.status = NdrStatus::Escalated;
        ndr.attempt_number = 3;

        let recorded = record_new_attempt(
            &mut ndr,
            Actor::Carrier,
            json!({}),
            3,
            EscalationPolicy::ManualEscalation,
            "test",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(recorded.status, NdrStatus::Escalated);
        assert_eq!(recorded.forced, None);
        assert_eq!(recorded.follow_up(ndr.event_id), None);
        assert_eq!(ndr.actions_of(ActionType::ReattemptFailed).count(), 1);
    }
}
