//! Per-seller escalation policy.

use crate::config::GovernorConfig;
use crate::services::OrderReadModel;
use crate::state_machine::{NdrStatus, NdrTransition};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// What the governor does with an event that ran out of attempts or time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPolicy {
    /// Move to `escalated` and leave the decision to the seller
    #[default]
    ManualEscalation,
    /// Return to origin without waiting for the seller
    AutoRto,
}

impl EscalationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualEscalation => "manual_escalation",
            Self::AutoRto => "auto_rto",
        }
    }

    /// Forced transition for an event currently in `status`, if the policy calls for one.
    /// Manual escalation leaves already-escalated events to the seller.
    pub fn transition_for(&self, status: NdrStatus, reason: &str) -> Option<NdrTransition> {
        if status.is_terminal() {
            return None;
        }
        match self {
            Self::ManualEscalation if status == NdrStatus::Escalated => None,
            Self::ManualEscalation => Some(NdrTransition::escalate(reason)),
            Self::AutoRto => Some(NdrTransition::trigger_rto(reason)),
        }
    }
}

impl fmt::Display for EscalationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves the policy for a shipment through its seller.
///
/// Lookup failures fall back to the configured default policy so that an
/// unavailable order read model never stalls escalation.
#[derive(Debug, Clone)]
pub struct SellerPolicyResolver {
    config: GovernorConfig,
    orders: Arc<dyn OrderReadModel>,
    lookup_timeout: Duration,
}

impl SellerPolicyResolver {
    pub fn new(config: GovernorConfig, orders: Arc<dyn OrderReadModel>, lookup_timeout: Duration) -> Self {
        Self {
            config,
            orders,
            lookup_timeout,
        }
    }

    pub fn default_policy(&self) -> EscalationPolicy {
        self.config.default_policy
    }

    pub async fn policy_for_shipment(&self, shipment_reference: &str) -> EscalationPolicy {
        if self.config.seller_policies.is_empty() {
            return self.config.default_policy;
        }

        match tokio::time::timeout(self.lookup_timeout, self.orders.shipment_info(shipment_reference)).await {
            Ok(Ok(Some(info))) => self.config.policy_for(&info.seller_id),
            Ok(Ok(None)) => self.config.default_policy,
            Ok(Err(e)) => {
                warn!(
                    shipment_reference = %shipment_reference,
                    error = %e,
                    "Seller lookup failed, using default escalation policy"
                );
                self.config.default_policy
            }
            Err(_) => {
                warn!(
                    shipment_reference = %shipment_reference,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Seller lookup timed out, using default escalation policy"
                );
                self.config.default_policy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{shipment_info, StaticOrderBook};

    #[test]
    fn test_transition_per_policy() {
        let manual = EscalationPolicy::ManualEscalation;
        let auto = EscalationPolicy::AutoRto;

        assert_eq!(
            manual.transition_for(NdrStatus::InResolution, "deadline_exceeded"),
            Some(NdrTransition::escalate("deadline_exceeded"))
        );
        assert_eq!(manual.transition_for(NdrStatus::Escalated, "deadline_exceeded"), None);
        assert_eq!(
            auto.transition_for(NdrStatus::Escalated, "deadline_exceeded"),
            Some(NdrTransition::trigger_rto("deadline_exceeded"))
        );
        assert_eq!(auto.transition_for(NdrStatus::Resolved, "x"), None);
    }

    #[tokio::test]
    async fn test_resolver_uses_seller_override() {
        let orders = Arc::new(StaticOrderBook::new());
        orders.insert(shipment_info("S1", "seller-auto", true));
        orders.insert(shipment_info("S2", "seller-other", false));

        let mut config = GovernorConfig::default();
        config
            .seller_policies
            .insert("seller-auto".to_string(), EscalationPolicy::AutoRto);
        let resolver = SellerPolicyResolver::new(config, orders, Duration::from_millis(100));

        assert_eq!(resolver.policy_for_shipment("S1").await, EscalationPolicy::AutoRto);
        assert_eq!(
            resolver.policy_for_shipment("S2").await,
            EscalationPolicy::ManualEscalation
        );
        assert_eq!(
            resolver.policy_for_shipment("unknown").await,
            EscalationPolicy::ManualEscalation
        );
    }
}
