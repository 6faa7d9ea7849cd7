//! The configuration and rule tables shipped in `config/` load and validate.

use ndr_core::config::ConfigManager;
use ndr_core::governor::EscalationPolicy;
use ndr_core::models::{CarrierSignal, NdrCategory, SignalKind};
use ndr_core::normalizer::SignalNormalizer;
use std::path::PathBuf;

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

fn signal(carrier: &str, code: &str, remarks: &str) -> CarrierSignal {
    CarrierSignal {
        carrier_id: carrier.to_string(),
        shipment_reference: "AWB-1".to_string(),
        status_code: code.to_string(),
        remarks: remarks.to_string(),
        attempt_number: Some(1),
        timestamp: chrono::Utc::now(),
        carrier_event_key: None,
    }
}

#[test]
fn development_and_test_environments_load() {
    for environment in ["development", "test"] {
        let manager = ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), environment)
            .unwrap_or_else(|e| panic!("{environment} config should load: {e}"));
        let config = manager.config();
        assert_eq!(config.engine.attempt_threshold, 3);
        assert_eq!(config.engine.resolution_deadline_hours, 48);
        assert_eq!(config.tokens.ttl_days, 7);
        assert_eq!(config.governor.default_policy, EscalationPolicy::ManualEscalation);
    }
}

#[test]
fn test_environment_overrides_base_file() {
    let manager = ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test").unwrap();
    let config = manager.config();

    assert!(!config.web.enabled);
    assert!(!config.governor.enabled);
    assert_eq!(config.carrier_commands.max_attempts, 2);
}

#[test]
fn production_requires_a_token_secret() {
    if std::env::var("NDR__TOKENS__SECRET").is_ok() {
        return;
    }
    let result = ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "production");
    assert!(result.is_err());
}

#[test]
fn shipped_rule_tables_classify_carrier_codes() {
    let manager = ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test").unwrap();
    let registry = manager.load_rule_registry().unwrap();
    assert!(registry.carrier_ids().any(|id| id == "bluedart"));
    let normalizer = SignalNormalizer::new(registry, manager.config().engine.min_classification_confidence);

    let refused = normalizer.normalize(&signal("BlueDart", "UD-07", ""));
    assert_eq!(refused.kind, SignalKind::NonDelivery);
    assert_eq!(refused.category, NdrCategory::Refused);

    let unavailable = normalizer.normalize(&signal("delhivery", "EOD-11", ""));
    assert_eq!(unavailable.category, NdrCategory::CustomerUnavailable);

    let delivered = normalizer.normalize(&signal("delhivery", "DLVD", ""));
    assert_eq!(delivered.kind, SignalKind::Delivered);

    let unknown_carrier = normalizer.normalize(&signal("new-carrier", "NDR", "wrong address given"));
    assert_eq!(unknown_carrier.category, NdrCategory::AddressIssue);
}
