use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed taxonomy of non-delivery causes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NdrCategory {
    AddressIssue,
    CustomerUnavailable,
    Refused,
    PaymentIssue,
    Other,
}

impl NdrCategory {
    pub const ALL: [NdrCategory; 5] = [
        Self::AddressIssue,
        Self::CustomerUnavailable,
        Self::Refused,
        Self::PaymentIssue,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddressIssue => "address_issue",
            Self::CustomerUnavailable => "customer_unavailable",
            Self::Refused => "refused",
            Self::PaymentIssue => "payment_issue",
            Self::Other => "other",
        }
    }

    /// Customer-facing description shown on the resolution page
    pub fn customer_description(&self) -> &'static str {
        match self {
            Self::AddressIssue => "The courier could not locate your delivery address",
            Self::CustomerUnavailable => "The courier could not reach you at the delivery address",
            Self::Refused => "The delivery was marked as refused",
            Self::PaymentIssue => "The payment on delivery could not be collected",
            Self::Other => "The delivery could not be completed",
        }
    }
}

impl fmt::Display for NdrCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NdrCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "address_issue" => Ok(Self::AddressIssue),
            "customer_unavailable" => Ok(Self::CustomerUnavailable),
            "refused" => Ok(Self::Refused),
            "payment_issue" => Ok(Self::PaymentIssue),
            "other" => Ok(Self::Other),
            _ => Err(format!("Invalid NDR category: {s}")),
        }
    }
}
