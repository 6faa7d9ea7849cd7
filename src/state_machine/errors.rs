use super::states::NdrStatus;
use thiserror::Error;
use uuid::Uuid;

/// Error types for state machine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },

    #[error("Invalid state transition from {from} via {event}")]
    InvalidTransition { from: NdrStatus, event: String },

    #[error("Event {event_id} is already in terminal status {status}")]
    AlreadyTerminal { event_id: Uuid, status: NdrStatus },
}

/// Specific error type for guard condition failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Event {event_id} is terminal ({status})")]
    Terminal { event_id: Uuid, status: NdrStatus },

    #[error("Business rule violation: {rule}")]
    BusinessRuleViolation { rule: String },

    #[error("Customer decision already recorded for attempt {attempt}")]
    DecisionAlreadyRecorded { attempt: u32 },
}

impl From<GuardError> for StateMachineError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Terminal { event_id, status } => Self::AlreadyTerminal { event_id, status },
            other => Self::GuardFailed {
                reason: other.to_string(),
            },
        }
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;

/// Helper function to create business rule violations
pub fn business_rule_violation(rule: impl Into<String>) -> GuardError {
    GuardError::BusinessRuleViolation { rule: rule.into() }
}
