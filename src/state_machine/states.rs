use serde::{Deserialize, Serialize};
use std::fmt;

/// NDR event lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NdrStatus {
    /// Initial state when the non-delivery is first detected (or a new attempt failed)
    Detected,
    /// Orchestrator side effects are running
    InResolution,
    /// Waiting on the customer to act through their capability token
    CustomerActionRequired,
    /// Resolved (carrier confirmed delivery or manual override)
    Resolved,
    /// Forced out of the automatic flow by policy, awaiting a seller decision
    Escalated,
    /// Shipment routed back to origin
    RtoTriggered,
}

impl NdrStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::RtoTriggered)
    }

    /// Check if a customer may still submit a decision in this state
    pub fn is_customer_actionable(&self) -> bool {
        matches!(
            self,
            Self::Detected | Self::InResolution | Self::CustomerActionRequired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::InResolution => "in_resolution",
            Self::CustomerActionRequired => "customer_action_required",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
            Self::RtoTriggered => "rto_triggered",
        }
    }
}

impl fmt::Display for NdrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NdrStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detected" => Ok(Self::Detected),
            "in_resolution" => Ok(Self::InResolution),
            "customer_action_required" => Ok(Self::CustomerActionRequired),
            "resolved" => Ok(Self::Resolved),
            "escalated" => Ok(Self::Escalated),
            "rto_triggered" => Ok(Self::RtoTriggered),
            _ => Err(format!("Invalid NDR status: {s}")),
        }
    }
}

impl Default for NdrStatus {
    fn default() -> Self {
        Self::Detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(NdrStatus::Resolved.is_terminal());
        assert!(NdrStatus::RtoTriggered.is_terminal());
        assert!(!NdrStatus::Detected.is_terminal());
        assert!(!NdrStatus::InResolution.is_terminal());
        assert!(!NdrStatus::CustomerActionRequired.is_terminal());
        assert!(!NdrStatus::Escalated.is_terminal());
    }

    #[test]
    fn test_customer_actionable() {
        assert!(NdrStatus::CustomerActionRequired.is_customer_actionable());
        assert!(!NdrStatus::Escalated.is_customer_actionable());
        assert!(!NdrStatus::Resolved.is_customer_actionable());
    }

    #[test]
    fn test_status_string_conversion() {
        assert_eq!(
            NdrStatus::CustomerActionRequired.to_string(),
            "customer_action_required"
        );
        assert_eq!(
            "rto_triggered".parse::<NdrStatus>().unwrap(),
            NdrStatus::RtoTriggered
        );
        assert!("returned".parse::<NdrStatus>().is_err());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&NdrStatus::InResolution).unwrap();
        assert_eq!(json, "\"in_resolution\"");

        let parsed: NdrStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, NdrStatus::InResolution);
    }
}
