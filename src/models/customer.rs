//! Customer-facing payloads for the resolution flow.

use super::category::NdrCategory;
use super::ndr_event::{ActionType, NdrEvent};
use crate::state_machine::NdrStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub landmark: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl DeliveryAddress {
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("line1", &self.line1),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(format!("{field} is required"));
            }
        }
        if !self.postal_code.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-') {
            return Err("postal_code contains invalid characters".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Morning => write!(f, "morning"),
            Self::Afternoon => write!(f, "afternoon"),
            Self::Evening => write!(f, "evening"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerActionKind {
    UpdateAddress,
    Reschedule,
    Cancel,
}

impl CustomerActionKind {
    pub const ALL: [CustomerActionKind; 3] = [Self::UpdateAddress, Self::Reschedule, Self::Cancel];
}

/// Window of dates a customer may pick when rescheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleWindow {
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
}

/// Sanitized event view for the customer resolution page.
///
/// Carries no customer contact data, carrier keys, or audit metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub shipment_reference: String,
    pub category: NdrCategory,
    pub reason: String,
    pub status: NdrStatus,
    pub attempt_number: u32,
    pub detected_at: DateTime<Utc>,
    pub resolution_deadline: DateTime<Utc>,
    /// The event reached a terminal status; `outcome` says which
    pub concluded: bool,
    pub outcome: Option<String>,
    pub allowed_actions: Vec<CustomerActionKind>,
    pub reschedule_window: Option<RescheduleWindow>,
}

impl EventSummary {
    pub fn from_event(event: &NdrEvent, reschedule_window: Option<RescheduleWindow>) -> Self {
        let actionable = event.status.is_customer_actionable() && event.customer_decision().is_none();
        let allowed_actions = if actionable {
            CustomerActionKind::ALL.to_vec()
        } else {
            Vec::new()
        };

        Self {
            shipment_reference: event.shipment_reference.clone(),
            category: event.category,
            reason: event.category.customer_description().to_string(),
            status: event.status,
            attempt_number: event.attempt_number,
            detected_at: event.detected_at,
            resolution_deadline: event.resolution_deadline,
            concluded: event.is_terminal(),
            outcome: outcome_message(event),
            allowed_actions,
            reschedule_window: if actionable { reschedule_window } else { None },
        }
    }
}

fn outcome_message(event: &NdrEvent) -> Option<String> {
    match event.status {
        NdrStatus::Resolved => Some("Your shipment has been delivered or resolved".to_string()),
        NdrStatus::RtoTriggered => {
            if event.actions_of(ActionType::CancelledByCustomer).next().is_some() {
                Some("Your order was cancelled and the shipment is returning to the seller".to_string())
            } else {
                Some("The shipment is being returned to the seller".to_string())
            }
        }
        NdrStatus::Escalated => {
            Some("The seller is reviewing this delivery; they will contact you".to_string())
        }
        _ => event
            .customer_decision()
            .map(|decision| match decision.action_type {
                ActionType::AddressUpdated => "Address updated; a new delivery attempt is being arranged",
                ActionType::Rescheduled => "Delivery rescheduled",
                _ => "Your request has been recorded",
            })
            .map(str::to_string),
    }
}
