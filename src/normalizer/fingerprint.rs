//! Deduplication keys for carrier signals.
//!
//! Carriers that supply an event key get it used verbatim. Otherwise the key is
//! derived from the fields that identify one physical attempt; the timestamp is
//! left out so a redelivered webhook with a fresh timestamp still collides.

use super::rules::normalize_code;
use crate::constants::FINGERPRINT_PREFIX;
use crate::models::CarrierSignal;
use sha2::{Digest, Sha256};

const FIELD_SEPARATOR: u8 = 0x1f;

/// Key used to recognise repeated deliveries of the same signal
pub fn signal_key(signal: &CarrierSignal) -> String {
    if let Some(key) = signal
        .carrier_event_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
    {
        return key.to_string();
    }
    fingerprint(signal)
}

fn fingerprint(signal: &CarrierSignal) -> String {
    let attempt = signal
        .attempt_number
        .map(|n| n.to_string())
        .unwrap_or_default();
    let fields = [
        signal.carrier_id.trim().to_lowercase(),
        signal.shipment_reference.trim().to_string(),
        normalize_code(&signal.status_code),
        attempt,
        signal.remarks.trim().to_lowercase(),
    ];

    let mut hasher = Sha256::new();
    for field in &fields {
        hasher.update(field.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
    }
    format!("{FINGERPRINT_PREFIX}{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn signal() -> CarrierSignal {
        CarrierSignal {
            carrier_id: "X".to_string(),
            shipment_reference: "S1".to_string(),
            status_code: "NDR".to_string(),
            remarks: "customer refused".to_string(),
            attempt_number: Some(1),
            timestamp: Utc::now(),
            carrier_event_key: None,
        }
    }

    #[test]
    fn test_carrier_key_used_verbatim() {
        let keyed = CarrierSignal {
            carrier_event_key: Some(" evt-123 ".to_string()),
            ..signal()
        };
        assert_eq!(signal_key(&keyed), "evt-123");
    }

    #[test]
    fn test_blank_carrier_key_falls_back_to_fingerprint() {
        let blank = CarrierSignal {
            carrier_event_key: Some("  ".to_string()),
            ..signal()
        };
        assert!(signal_key(&blank).starts_with(FINGERPRINT_PREFIX));
    }

    #[test]
    fn test_fingerprint_ignores_timestamp_and_case() {
        let original = signal();
        let redelivered = CarrierSignal {
            timestamp: original.timestamp + Duration::seconds(5),
            status_code: "ndr".to_string(),
            remarks: "Customer Refused ".to_string(),
            ..signal()
        };
        assert_eq!(signal_key(&original), signal_key(&redelivered));
    }

    #[test]
    fn test_fingerprint_distinguishes_attempts() {
        let second = CarrierSignal {
            attempt_number: Some(2),
            ..signal()
        };
        assert_ne!(signal_key(&signal()), signal_key(&second));
    }
}
