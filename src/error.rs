//! # Error Taxonomy
//!
//! Crate-level error type. Subsystems define their own `thiserror` enums
//! (`StoreError`, `StateMachineError`, `TokenError`, `CarrierCommandError`,
//! `ConfigurationError`) which fold into [`NdrError`] at the component boundary.
//!
//! Duplicate signals and ambiguous classifications are deliberately absent here:
//! the former is an ingest disposition, the latter a review flag on the event.

use crate::config::ConfigurationError;
use crate::resilience::CarrierCommandError;
use crate::state_machine::errors::StateMachineError;
use crate::state_machine::NdrStatus;
use crate::store::StoreError;
use crate::tokens::TokenError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NdrError {
    #[error("Stale write on event {event_id}: expected version {expected}, found {actual}")]
    StaleWrite {
        event_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Resolution link has expired")]
    TokenExpired,

    #[error("Resolution link is invalid: {reason}")]
    TokenInvalid { reason: String },

    #[error("Event {event_id} is already {status}")]
    EventAlreadyTerminal { event_id: Uuid, status: NdrStatus },

    #[error("Event {event_id} is already being resolved")]
    AlreadyInResolution { event_id: Uuid },

    #[error("Carrier command {command} failed: {reason}")]
    CarrierCommandFailed { command: String, reason: String },

    #[error("Event not found: {0}")]
    EventNotFound(Uuid),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Collaborator {service} failed: {reason}")]
    Collaborator { service: String, reason: String },
}

impl NdrError {
    /// Stable machine-readable code for API responses and log fields
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::StaleWrite { .. } => "stale_write",
            Self::TokenExpired => "token_expired",
            Self::TokenInvalid { .. } => "token_invalid",
            Self::EventAlreadyTerminal { .. } => "event_already_terminal",
            Self::AlreadyInResolution { .. } => "already_in_resolution",
            Self::CarrierCommandFailed { .. } => "carrier_command_failed",
            Self::EventNotFound(_) => "event_not_found",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Validation(_) => "validation_error",
            Self::Configuration(_) => "configuration_error",
            Self::Storage(_) => "storage_error",
            Self::Collaborator { .. } => "collaborator_error",
        }
    }

    /// Whether a caller may retry the same request against fresh state
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StaleWrite { .. } | Self::CarrierCommandFailed { .. } | Self::Storage(_)
        )
    }

    /// Concurrent writer or concurrent customer action won the race
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StaleWrite { .. } | Self::AlreadyInResolution { .. }
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn collaborator(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Collaborator {
            service: service.into(),
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for NdrError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StaleWrite {
                event_id,
                expected,
                actual,
            } => Self::StaleWrite {
                event_id,
                expected,
                actual,
            },
            StoreError::NotFound(event_id) => Self::EventNotFound(event_id),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<StateMachineError> for NdrError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::AlreadyTerminal { event_id, status } => {
                Self::EventAlreadyTerminal { event_id, status }
            }
            other => Self::InvalidTransition(other.to_string()),
        }
    }
}

impl From<TokenError> for NdrError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Self::TokenExpired,
            TokenError::EventAlreadyTerminal { event_id, status } => {
                Self::EventAlreadyTerminal { event_id, status }
            }
            TokenError::Store(store_err) => store_err.into(),
            other => Self::TokenInvalid {
                reason: other.to_string(),
            },
        }
    }
}

impl From<CarrierCommandError> for NdrError {
    fn from(err: CarrierCommandError) -> Self {
        Self::CarrierCommandFailed {
            command: err.command().to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<ConfigurationError> for NdrError {
    fn from(err: ConfigurationError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NdrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_write_maps_from_store() {
        let event_id = Uuid::new_v4();
        let err: NdrError = StoreError::StaleWrite {
            event_id,
            expected: 2,
            actual: 3,
        }
        .into();

        assert_eq!(err.error_code(), "stale_write");
        assert!(err.is_retryable());
        assert!(err.is_conflict());
    }

    #[test]
    fn test_token_errors_stay_distinct() {
        let expired: NdrError = TokenError::Expired.into();
        let invalid: NdrError = TokenError::BadSignature.into();
        let terminal: NdrError = TokenError::EventAlreadyTerminal {
            event_id: Uuid::new_v4(),
            status: NdrStatus::Resolved,
        }
        .into();

        assert_eq!(expired.error_code(), "token_expired");
        assert_eq!(invalid.error_code(), "token_invalid");
        assert_eq!(terminal.error_code(), "event_already_terminal");
    }
}
