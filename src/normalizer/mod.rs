//! # Signal Normalizer
//!
//! Maps carrier-specific status payloads onto the canonical NDR taxonomy.
//!
//! Classification is a pure function of `(rule table, signal)`. The rule
//! registry is read-only at request time; [`SignalNormalizer::reload`] swaps
//! in a new registry atomically so in-flight classifications keep the snapshot
//! they started with.
//!
//! Precedence, per carrier table:
//!
//! 1. delivered codes → [`SignalKind::Delivered`]
//! 2. status-code rules → category at the rule's (high) confidence
//! 3. keyword rules over the remarks, in table order
//! 4. generic non-delivery codes → `other` at the fallback confidence
//! 5. nothing matched → not a non-delivery signal

pub mod fingerprint;
pub mod rules;

pub use fingerprint::signal_key;
pub use rules::{CarrierRules, KeywordRule, RuleRegistry, RuleTableError, StatusRule};

use crate::models::{
    CarrierSignal, ClassificationSource, NdrCategory, NormalizedSignal, SignalKind,
};
use parking_lot::RwLock;
use rules::normalize_code;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Classify one signal against one carrier table
pub fn classify(rules: &CarrierRules, signal: &CarrierSignal, min_confidence: u8) -> NormalizedSignal {
    let code = normalize_code(&signal.status_code);

    if rules.delivered_codes.contains(&code) {
        return NormalizedSignal::delivered(100);
    }

    let matched = rules
        .status_rules
        .iter()
        .find(|rule| rule.codes.contains(&code))
        .map(|rule| (rule.category, rule.confidence, ClassificationSource::StatusCode))
        .or_else(|| {
            let remarks = signal.remarks.to_lowercase();
            rules
                .keyword_rules
                .iter()
                .find(|rule| rule.patterns.iter().any(|p| remarks.contains(p.as_str())))
                .map(|rule| (rule.category, rule.confidence, ClassificationSource::Keyword))
        })
        .or_else(|| {
            rules.generic_codes.contains(&code).then_some((
                NdrCategory::Other,
                rules.fallback_confidence,
                ClassificationSource::Fallback,
            ))
        });

    let Some((category, confidence, source)) = matched else {
        return NormalizedSignal::not_applicable();
    };

    let ambiguous = confidence < min_confidence;
    NormalizedSignal {
        kind: SignalKind::NonDelivery,
        category: if ambiguous { NdrCategory::Other } else { category },
        confidence,
        source,
        ambiguous,
    }
}

/// Carrier-table-driven classifier with an atomically swappable rule registry
#[derive(Debug)]
pub struct SignalNormalizer {
    registry: RwLock<Arc<RuleRegistry>>,
    min_confidence: u8,
}

impl SignalNormalizer {
    pub fn new(registry: RuleRegistry, min_confidence: u8) -> Self {
        info!(
            tables = registry.table_count(),
            min_confidence = min_confidence,
            "Signal normalizer initialized"
        );
        Self {
            registry: RwLock::new(Arc::new(registry)),
            min_confidence,
        }
    }

    /// Classify a signal using the current registry snapshot
    pub fn normalize(&self, signal: &CarrierSignal) -> NormalizedSignal {
        let registry = self.snapshot();
        let normalized = classify(registry.rules_for(&signal.carrier_id), signal, self.min_confidence);

        if normalized.ambiguous {
            warn!(
                carrier_id = %signal.carrier_id,
                shipment_reference = %signal.shipment_reference,
                status_code = %signal.status_code,
                confidence = normalized.confidence,
                "Ambiguous NDR classification, flagging for manual review"
            );
        } else {
            debug!(
                carrier_id = %signal.carrier_id,
                shipment_reference = %signal.shipment_reference,
                kind = ?normalized.kind,
                category = %normalized.category,
                confidence = normalized.confidence,
                "Signal classified"
            );
        }

        normalized
    }

    /// Current registry; cheap to clone and safe to hold across await points
    pub fn snapshot(&self) -> Arc<RuleRegistry> {
        Arc::clone(&self.registry.read())
    }

    /// Replace the rule registry. Readers see either the old or the new registry, never a mix.
    pub fn reload(&self, registry: RuleRegistry) {
        let tables = registry.table_count();
        *self.registry.write() = Arc::new(registry);
        info!(tables = tables, "Carrier rule tables reloaded");
    }

    pub fn min_confidence(&self) -> u8 {
        self.min_confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn signal(status_code: &str, remarks: &str) -> CarrierSignal {
        CarrierSignal {
            carrier_id: "X".to_string(),
            shipment_reference: "S1".to_string(),
            status_code: status_code.to_string(),
            remarks: remarks.to_string(),
            attempt_number: Some(1),
            timestamp: Utc::now(),
            carrier_event_key: None,
        }
    }

    fn normalizer() -> SignalNormalizer {
        SignalNormalizer::new(RuleRegistry::builtin(), 60)
    }

    #[test]
    fn test_generic_code_with_refusal_remarks() {
        let result = normalizer().normalize(&signal("NDR", "customer refused"));

        assert!(result.is_non_delivery());
        assert_eq!(result.category, NdrCategory::Refused);
        assert_eq!(result.source, ClassificationSource::Keyword);
        assert!(!result.ambiguous);
    }

    #[test]
    fn test_status_code_takes_precedence_over_keywords() {
        let result = normalizer().normalize(&signal("cna", "customer refused the parcel"));

        assert_eq!(result.category, NdrCategory::CustomerUnavailable);
        assert_eq!(result.confidence, 95);
        assert_eq!(result.source, ClassificationSource::StatusCode);
    }

    #[test]
    fn test_keyword_rules_evaluated_in_order() {
        // "refused" rule precedes the address rule
        let result = normalizer().normalize(&signal("UD", "wrong address, consignee refused"));
        assert_eq!(result.category, NdrCategory::Refused);
    }

    #[test]
    fn test_generic_code_without_keywords_is_ambiguous_other() {
        let result = normalizer().normalize(&signal("NDR", "see notes"));

        assert!(result.is_non_delivery());
        assert_eq!(result.category, NdrCategory::Other);
        assert_eq!(result.source, ClassificationSource::Fallback);
        assert!(result.ambiguous);
    }

    #[test]
    fn test_low_confidence_keyword_becomes_other() {
        let mut rules = CarrierRules::builtin_default();
        rules.keyword_rules[0].confidence = 40;
        let result = classify(&rules, &signal("NDR", "refused"), 60);

        assert_eq!(result.category, NdrCategory::Other);
        assert_eq!(result.confidence, 40);
        assert!(result.ambiguous);
    }

    #[test]
    fn test_delivered_and_in_transit_codes() {
        let n = normalizer();
        assert!(n.normalize(&signal("DL", "")).is_delivered());

        let in_transit = n.normalize(&signal("IT", "arrived at hub"));
        assert!(!in_transit.is_non_delivery());
        assert!(!in_transit.is_delivered());
    }

    #[test]
    fn test_reload_swaps_tables_atomically() {
        let n = normalizer();
        let before = n.snapshot();

        let mut custom = CarrierRules::builtin_default();
        custom.generic_codes.push("X-42".to_string());
        let mut carriers = HashMap::new();
        carriers.insert("default".to_string(), CarrierRules::builtin_default());
        carriers.insert("x".to_string(), custom);
        n.reload(RuleRegistry::new(carriers).unwrap());

        assert!(n.normalize(&signal("X-42", "")).is_non_delivery());
        // An earlier snapshot is unaffected by the reload
        assert!(!classify(before.rules_for("x"), &signal("X-42", ""), 60).is_non_delivery());
    }
}
