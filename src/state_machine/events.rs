use serde::{Deserialize, Serialize};

/// Events that can trigger NDR event state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NdrTransition {
    /// Orchestrator starts side effects for the current attempt
    BeginResolution,
    /// Token issued, the event now waits on the customer
    AwaitCustomer,
    /// Customer corrected the address or rescheduled
    CustomerDecision,
    /// Customer cancelled the order
    CustomerCancel,
    /// Carrier reported another distinct failed attempt
    NewAttempt,
    /// Carrier confirmed delivery
    ConfirmDelivered,
    /// Policy or operator escalation
    Escalate(String),
    /// Policy, seller or operator decided on return-to-origin
    TriggerRto(String),
    /// Operator override
    ResolveManually,
}

impl NdrTransition {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BeginResolution => "begin_resolution",
            Self::AwaitCustomer => "await_customer",
            Self::CustomerDecision => "customer_decision",
            Self::CustomerCancel => "customer_cancel",
            Self::NewAttempt => "new_attempt",
            Self::ConfirmDelivered => "confirm_delivered",
            Self::Escalate(_) => "escalate",
            Self::TriggerRto(_) => "trigger_rto",
            Self::ResolveManually => "resolve_manually",
        }
    }

    /// Reason text carried by policy transitions
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Escalate(reason) | Self::TriggerRto(reason) => Some(reason),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CustomerCancel | Self::ConfirmDelivered | Self::TriggerRto(_) | Self::ResolveManually
        )
    }

    pub fn escalate(reason: impl Into<String>) -> Self {
        Self::Escalate(reason.into())
    }

    pub fn trigger_rto(reason: impl Into<String>) -> Self {
        Self::TriggerRto(reason.into())
    }
}
