//! # Carrier Rule Tables
//!
//! Per-carrier classification data. Adding a carrier is a data change: a new
//! entry under `carriers.<id>` in the rule file, no new code paths.
//!
//! ```toml
//! [carriers.default]
//! delivered_codes = ["DL"]
//! generic_codes = ["NDR", "UD"]
//!
//! [[carriers.default.status_rules]]
//! codes = ["REFUSED"]
//! category = "refused"
//! confidence = 95
//!
//! [[carriers.default.keyword_rules]]
//! patterns = ["refused", "rejected"]
//! category = "refused"
//! confidence = 85
//! ```

use crate::constants::DEFAULT_CARRIER;
use crate::models::NdrCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleTableError {
    #[error("Failed to load rule table from {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Rule table has no `default` carrier entry")]
    MissingDefault,

    #[error("Invalid rule for carrier {carrier}: {reason}")]
    InvalidRule { carrier: String, reason: String },
}

fn default_status_confidence() -> u8 {
    95
}

fn default_fallback_confidence() -> u8 {
    30
}

/// Status-code set mapped to a category at high confidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRule {
    pub codes: Vec<String>,
    pub category: NdrCategory,
    #[serde(default = "default_status_confidence")]
    pub confidence: u8,
}

/// Remarks keyword patterns mapped to a category; evaluated in table order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub patterns: Vec<String>,
    pub category: NdrCategory,
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierRules {
    /// Codes confirming delivery
    #[serde(default)]
    pub delivered_codes: Vec<String>,
    /// Codes meaning "not delivered" without saying why
    #[serde(default)]
    pub generic_codes: Vec<String>,
    #[serde(default)]
    pub status_rules: Vec<StatusRule>,
    #[serde(default)]
    pub keyword_rules: Vec<KeywordRule>,
    /// Confidence assigned to a generic code with no keyword match
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: u8,
}

impl CarrierRules {
    /// Uppercase codes and lowercase keyword patterns so matching is a plain comparison
    fn normalized(mut self) -> Self {
        let upper = |codes: &mut Vec<String>| {
            for code in codes.iter_mut() {
                *code = normalize_code(code);
            }
        };
        upper(&mut self.delivered_codes);
        upper(&mut self.generic_codes);
        for rule in &mut self.status_rules {
            upper(&mut rule.codes);
        }
        for rule in &mut self.keyword_rules {
            for pattern in rule.patterns.iter_mut() {
                *pattern = pattern.trim().to_lowercase();
            }
        }
        self
    }

    fn validate(&self, carrier: &str) -> Result<(), RuleTableError> {
        let invalid = |reason: String| RuleTableError::InvalidRule {
            carrier: carrier.to_string(),
            reason,
        };

        if self.fallback_confidence > 100 {
            return Err(invalid("fallback_confidence exceeds 100".to_string()));
        }
        for rule in &self.status_rules {
            if rule.codes.is_empty() || rule.codes.iter().any(|c| c.is_empty()) {
                return Err(invalid(format!("status rule for {} has empty codes", rule.category)));
            }
            if rule.confidence > 100 {
                return Err(invalid(format!("status rule for {} exceeds 100", rule.category)));
            }
        }
        for rule in &self.keyword_rules {
            if rule.patterns.is_empty() || rule.patterns.iter().any(|p| p.is_empty()) {
                return Err(invalid(format!("keyword rule for {} has empty patterns", rule.category)));
            }
            if rule.confidence > 100 {
                return Err(invalid(format!("keyword rule for {} exceeds 100", rule.category)));
            }
        }
        Ok(())
    }

    /// Built-in table used when no rule file is configured
    pub fn builtin_default() -> Self {
        let status = |codes: &[&str], category| StatusRule {
            codes: codes.iter().map(|c| c.to_string()).collect(),
            category,
            confidence: 95,
        };
        let keywords = |patterns: &[&str], category, confidence| KeywordRule {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            category,
            confidence,
        };

        Self {
            delivered_codes: vec!["DL".into(), "DELIVERED".into()],
            generic_codes: vec![
                "NDR".into(),
                "UD".into(),
                "UNDELIVERED".into(),
                "FAILED_DELIVERY".into(),
            ],
            status_rules: vec![
                status(&["REFUSED", "CR"], NdrCategory::Refused),
                status(&["BAD_ADDRESS", "AI"], NdrCategory::AddressIssue),
                status(&["CNA", "CUSTOMER_NOT_AVAILABLE"], NdrCategory::CustomerUnavailable),
                status(&["COD_NOT_READY", "PAYMENT_ISSUE"], NdrCategory::PaymentIssue),
            ],
            keyword_rules: vec![
                keywords(
                    &["refused", "rejected", "not accepted", "denied delivery"],
                    NdrCategory::Refused,
                    85,
                ),
                keywords(
                    &["cod amount", "cash not ready", "no cash", "payment"],
                    NdrCategory::PaymentIssue,
                    80,
                ),
                keywords(
                    &[
                        "incomplete address",
                        "address incomplete",
                        "wrong address",
                        "incorrect address",
                        "address not found",
                        "unable to locate",
                    ],
                    NdrCategory::AddressIssue,
                    80,
                ),
                keywords(
                    &[
                        "not available",
                        "unavailable",
                        "door locked",
                        "not reachable",
                        "no response",
                        "out of station",
                        "premises closed",
                    ],
                    NdrCategory::CustomerUnavailable,
                    75,
                ),
            ],
            fallback_confidence: default_fallback_confidence(),
        }
        .normalized()
    }
}

/// Carrier id → rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRegistry {
    default: CarrierRules,
    carriers: HashMap<String, CarrierRules>,
}

impl RuleRegistry {
    /// Build a registry, normalizing carrier ids and rule contents
    pub fn new(carriers: HashMap<String, CarrierRules>) -> Result<Self, RuleTableError> {
        let mut carriers: HashMap<String, CarrierRules> = carriers
            .into_iter()
            .map(|(carrier, rules)| (carrier.trim().to_lowercase(), rules.normalized()))
            .collect();

        for (carrier, rules) in &carriers {
            rules.validate(carrier)?;
        }
        let default = carriers
            .remove(DEFAULT_CARRIER)
            .ok_or(RuleTableError::MissingDefault)?;

        Ok(Self { default, carriers })
    }

    pub fn builtin() -> Self {
        Self {
            default: CarrierRules::builtin_default(),
            carriers: HashMap::new(),
        }
    }

    /// Load a TOML or JSON rule file (format chosen by extension)
    pub fn load_from_path(path: &Path) -> Result<Self, RuleTableError> {
        #[derive(Deserialize)]
        struct RuleFile {
            carriers: HashMap<String, CarrierRules>,
        }

        let load_err = |reason: String| RuleTableError::Load {
            path: path.display().to_string(),
            reason,
        };

        let file: RuleFile = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| load_err(e.to_string()))?;

        Self::new(file.carriers)
    }

    /// Rules for a carrier, falling back to the default table for unknown carriers
    pub fn rules_for(&self, carrier_id: &str) -> &CarrierRules {
        self.carriers
            .get(&carrier_id.trim().to_lowercase())
            .unwrap_or(&self.default)
    }

    pub fn default_rules(&self) -> &CarrierRules {
        &self.default
    }

    /// Carriers with a dedicated table (the default table is not listed)
    pub fn carrier_ids(&self) -> impl Iterator<Item = &str> {
        self.carriers.keys().map(String::as_str)
    }

    /// Number of tables including the default one
    pub fn table_count(&self) -> usize {
        self.carriers.len() + 1
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_registry_requires_default() {
        let mut carriers = HashMap::new();
        carriers.insert("bluedart".to_string(), CarrierRules::builtin_default());
        assert!(matches!(
            RuleRegistry::new(carriers),
            Err(RuleTableError::MissingDefault)
        ));
    }

    #[test]
    fn test_unknown_carrier_falls_back_to_default() {
        let registry = RuleRegistry::builtin();
        assert_eq!(registry.rules_for("unknown-carrier"), registry.rules_for("default"));
    }

    #[test]
    fn test_carrier_ids_are_case_insensitive() {
        let mut custom = CarrierRules::builtin_default();
        custom.generic_codes = vec!["x-ndr".to_string()];
        let mut carriers = HashMap::new();
        carriers.insert("default".to_string(), CarrierRules::builtin_default());
        carriers.insert("BlueDart".to_string(), custom);

        let registry = RuleRegistry::new(carriers).unwrap();
        assert_eq!(registry.rules_for("BLUEDART").generic_codes, vec!["X-NDR".to_string()]);
    }

    #[test]
    fn test_rejects_confidence_over_100() {
        let mut rules = CarrierRules::builtin_default();
        rules.keyword_rules[0].confidence = 101;
        let mut carriers = HashMap::new();
        carriers.insert("default".to_string(), rules);

        assert!(matches!(
            RuleRegistry::new(carriers),
            Err(RuleTableError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[carriers.default]
generic_codes = ["NDR"]

[carriers.fastship]
generic_codes = ["F-99"]
delivered_codes = ["F-00"]

[[carriers.fastship.keyword_rules]]
patterns = ["Gate Closed"]
category = "customer_unavailable"
confidence = 70
"#
        )
        .unwrap();

        let registry = RuleRegistry::load_from_path(file.path()).unwrap();
        let fastship = registry.rules_for("fastship");
        assert_eq!(fastship.generic_codes, vec!["F-99".to_string()]);
        assert_eq!(fastship.keyword_rules[0].patterns, vec!["gate closed".to_string()]);
        assert_eq!(fastship.fallback_confidence, 30);
    }
}
