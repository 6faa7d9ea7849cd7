//! Builders for signals, shipments and addresses used across tests.

use crate::models::{
    CarrierSignal, ClassificationSource, DeliveryAddress, NdrCategory, NdrEvent, NormalizedSignal,
    SignalKind,
};
use crate::services::{Contact, ShipmentInfo};
use chrono::{DateTime, Utc};

/// Non-delivery signal with a carrier-reported attempt and no carrier event key
pub fn ndr_signal(
    carrier_id: &str,
    shipment_reference: &str,
    status_code: &str,
    remarks: &str,
    attempt_number: Option<u32>,
) -> CarrierSignal {
    CarrierSignal {
        carrier_id: carrier_id.to_string(),
        shipment_reference: shipment_reference.to_string(),
        status_code: status_code.to_string(),
        remarks: remarks.to_string(),
        attempt_number,
        timestamp: Utc::now(),
        carrier_event_key: None,
    }
}

/// `ndr_signal` pinned to a timestamp
pub fn ndr_signal_at(
    shipment_reference: &str,
    remarks: &str,
    attempt_number: u32,
    timestamp: DateTime<Utc>,
) -> CarrierSignal {
    CarrierSignal {
        timestamp,
        ..ndr_signal("X", shipment_reference, "NDR", remarks, Some(attempt_number))
    }
}

pub fn delivered_signal(carrier_id: &str, shipment_reference: &str) -> CarrierSignal {
    ndr_signal(carrier_id, shipment_reference, "DL", "delivered to customer", None)
}

pub fn with_event_key(mut signal: CarrierSignal, key: &str) -> CarrierSignal {
    signal.carrier_event_key = Some(key.to_string());
    signal
}

pub fn sample_address() -> DeliveryAddress {
    DeliveryAddress {
        line1: "14 Residency Road".to_string(),
        line2: Some("Flat 3B".to_string()),
        landmark: Some("Opposite the metro station".to_string()),
        city: "Bengaluru".to_string(),
        state: "Karnataka".to_string(),
        postal_code: "560025".to_string(),
        phone: Some("+919800000001".to_string()),
    }
}

pub fn shipment_info(shipment_reference: &str, seller_id: &str, prepaid: bool) -> ShipmentInfo {
    ShipmentInfo {
        shipment_reference: shipment_reference.to_string(),
        order_id: format!("ORD-{shipment_reference}"),
        seller_id: seller_id.to_string(),
        customer: Contact {
            name: Some("Asha".to_string()),
            phone: Some("+919800000001".to_string()),
            email: Some("asha@example.com".to_string()),
        },
        seller: Contact {
            name: Some("Acme Store".to_string()),
            phone: None,
            email: Some("ops@acme.example.com".to_string()),
        },
        current_address: DeliveryAddress {
            line1: "14 Residency Rd".to_string(),
            line2: None,
            landmark: None,
            city: "Bengaluru".to_string(),
            state: "Karnataka".to_string(),
            postal_code: "560025".to_string(),
            phone: None,
        },
        prepaid,
    }
}

/// Event as detected at `detected_at`, not yet stored
pub fn detected_event(shipment_reference: &str, detected_at: DateTime<Utc>) -> NdrEvent {
    let normalized = NormalizedSignal {
        kind: SignalKind::NonDelivery,
        category: NdrCategory::CustomerUnavailable,
        confidence: 80,
        source: ClassificationSource::StatusCode,
        ambiguous: false,
    };
    let signal = CarrierSignal {
        timestamp: detected_at,
        ..ndr_signal("X", shipment_reference, "CNA", "customer not available", Some(1))
    };
    NdrEvent::detect(
        &signal,
        &normalized,
        &format!("test:{shipment_reference}"),
        detected_at,
        chrono::Duration::hours(48),
    )
}
