use super::errors::{business_rule_violation, GuardError, GuardResult};
use crate::models::NdrEvent;

/// Trait for implementing state transition guards
pub trait StateGuard {
    /// Check if the guarded operation is allowed on this event
    fn check(&self, event: &NdrEvent) -> GuardResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Guard rejecting any mutation of a terminal event
pub struct NotTerminalGuard;

impl StateGuard for NotTerminalGuard {
    fn check(&self, event: &NdrEvent) -> GuardResult<()> {
        if event.is_terminal() {
            return Err(GuardError::Terminal {
                event_id: event.event_id,
                status: event.status,
            });
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Event must not be terminal"
    }
}

/// Guard for customer decisions: one decision per attempt, only in customer-actionable states
pub struct CustomerDecisionGuard;

impl StateGuard for CustomerDecisionGuard {
    fn check(&self, event: &NdrEvent) -> GuardResult<()> {
        NotTerminalGuard.check(event)?;

        if !event.status.is_customer_actionable() {
            return Err(business_rule_violation(format!(
                "Event {} is {} and no longer accepts customer decisions",
                event.event_id, event.status
            )));
        }

        if event.customer_decision().is_some() {
            return Err(GuardError::DecisionAlreadyRecorded {
                attempt: event.attempt_number,
            });
        }

        Ok(())
    }

    fn description(&self) -> &'static str {
        "Customer may decide once per attempt while the event is actionable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ActionOutcome, ActionType, Actor, CarrierSignal, ClassificationSource, NdrCategory,
        NormalizedSignal, ResolutionAction, SignalKind,
    };
    use crate::state_machine::NdrStatus;
    use chrono::{Duration, Utc};

    fn event() -> NdrEvent {
        let signal = CarrierSignal {
            carrier_id: "X".to_string(),
            shipment_reference: "S1".to_string(),
            status_code: "NDR".to_string(),
            remarks: "address incomplete".to_string(),
            attempt_number: None,
            timestamp: Utc::now(),
            carrier_event_key: None,
        };
        let normalized = NormalizedSignal {
            kind: SignalKind::NonDelivery,
            category: NdrCategory::AddressIssue,
            confidence: 90,
            source: ClassificationSource::Keyword,
            ambiguous: false,
        };
        NdrEvent::detect(&signal, &normalized, "k", Utc::now(), Duration::hours(48))
    }

    #[test]
    fn test_guard_descriptions() {
        assert_eq!(NotTerminalGuard.description(), "Event must not be terminal");
        assert_eq!(
            CustomerDecisionGuard.description(),
            "Customer may decide once per attempt while the event is actionable"
        );
    }

    #[test]
    fn test_customer_guard_rejects_second_decision() {
        let mut ndr = event();
        assert!(CustomerDecisionGuard.check(&ndr).is_ok());

        ndr.push_action(ResolutionAction::new(
            ActionType::AddressUpdated,
            1,
            Actor::Customer,
            ActionOutcome::Success,
            Utc::now(),
        ));
        assert_eq!(
            CustomerDecisionGuard.check(&ndr),
            Err(GuardError::DecisionAlreadyRecorded { attempt: 1 })
        );
    }

    #[test]
    fn test_customer_guard_rejects_escalated_and_terminal() {
        let mut ndr = event();
        ndr.status = NdrStatus::Escalated;
        assert!(matches!(
            CustomerDecisionGuard.check(&ndr),
            Err(GuardError::BusinessRuleViolation { .. })
        ));

        ndr.status = NdrStatus::Resolved;
        assert!(matches!(
            CustomerDecisionGuard.check(&ndr),
            Err(GuardError::Terminal { .. })
        ));
    }
}
