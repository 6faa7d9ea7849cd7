//! Carrier signal ingress payload and its normalized classification.

use super::category::NdrCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A carrier status callback after transport decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierSignal {
    pub carrier_id: String,
    pub shipment_reference: String,
    pub status_code: String,
    #[serde(default)]
    pub remarks: String,
    /// Attempt number as reported by the carrier, when it reports one
    #[serde(default)]
    pub attempt_number: Option<u32>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub carrier_event_key: Option<String>,
}

impl CarrierSignal {
    pub fn validate(&self) -> Result<(), String> {
        if self.carrier_id.trim().is_empty() {
            return Err("carrier_id must not be empty".to_string());
        }
        if self.shipment_reference.trim().is_empty() {
            return Err("shipment_reference must not be empty".to_string());
        }
        if self.status_code.trim().is_empty() {
            return Err("status_code must not be empty".to_string());
        }
        if self.attempt_number == Some(0) {
            return Err("attempt_number starts at 1".to_string());
        }
        Ok(())
    }
}

/// What kind of status update a signal represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    NonDelivery,
    Delivered,
    /// Ordinary in-transit update, not this engine's concern
    Other,
}

/// Where a classification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    StatusCode,
    Keyword,
    /// Generic non-delivery code with no keyword match
    Fallback,
    None,
}

/// Normalizer output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedSignal {
    pub kind: SignalKind,
    pub category: NdrCategory,
    /// 0-100
    pub confidence: u8,
    pub source: ClassificationSource,
    /// Confidence fell below the review threshold
    pub ambiguous: bool,
}

impl NormalizedSignal {
    pub fn is_non_delivery(&self) -> bool {
        self.kind == SignalKind::NonDelivery
    }

    pub fn is_delivered(&self) -> bool {
        self.kind == SignalKind::Delivered
    }

    pub fn not_applicable() -> Self {
        Self {
            kind: SignalKind::Other,
            category: NdrCategory::Other,
            confidence: 0,
            source: ClassificationSource::None,
            ambiguous: false,
        }
    }

    pub fn delivered(confidence: u8) -> Self {
        Self {
            kind: SignalKind::Delivered,
            category: NdrCategory::Other,
            confidence,
            source: ClassificationSource::StatusCode,
            ambiguous: false,
        }
    }
}
