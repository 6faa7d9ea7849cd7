//! # System Constants
//!
//! Operational boundaries of the NDR resolution engine. Configuration defaults
//! are taken from here so that a missing config file still yields the documented
//! engine behaviour.

pub use crate::state_machine::NdrStatus;

/// Purpose claim carried by every customer resolution capability token
pub const TOKEN_PURPOSE: &str = "ndr_resolution";

/// Prefix for engine-derived signal fingerprints
pub const FINGERPRINT_PREFIX: &str = "fp:";

/// Default rule table key used when a carrier has no table of its own
pub const DEFAULT_CARRIER: &str = "default";

/// Engine defaults
pub mod defaults {
    pub const ATTEMPT_THRESHOLD: u32 = 3;
    pub const RESOLUTION_DEADLINE_HOURS: i64 = 48;
    pub const TOKEN_TTL_DAYS: i64 = 7;
    pub const RESCHEDULE_WINDOW_DAYS: i64 = 7;
    pub const MIN_CLASSIFICATION_CONFIDENCE: u8 = 60;
    pub const CAS_MAX_RETRIES: u32 = 5;
    pub const ORCHESTRATOR_QUEUE_CAPACITY: usize = 1024;
    pub const GOVERNOR_SWEEP_INTERVAL_SECONDS: u64 = 300;
    pub const GOVERNOR_BATCH_SIZE: usize = 500;
}

/// Notification template identifiers handed to the notifier
pub mod templates {
    pub const CUSTOMER_ACTION_REQUIRED: &str = "ndr.customer_action_required";
    pub const CUSTOMER_REATTEMPT_SCHEDULED: &str = "ndr.customer_reattempt_scheduled";
    pub const SELLER_NDR_ALERT: &str = "ndr.seller_alert";
    pub const SELLER_ESCALATION_ALERT: &str = "ndr.seller_escalation_alert";
}

/// Reasons recorded on forced transitions
pub mod escalation_reasons {
    pub const ATTEMPT_THRESHOLD_REACHED: &str = "attempt_threshold_reached";
    pub const DEADLINE_EXCEEDED: &str = "deadline_exceeded";
}

/// `actor` values recorded on escalation records
pub mod initiators {
    pub const INGESTOR: &str = "signal_ingestor";
    pub const ORCHESTRATOR: &str = "resolution_orchestrator";
    pub const GOVERNOR: &str = "escalation_governor";
}

/// Operation names used in structured log records
pub mod operations {
    pub const SIGNAL_INGESTED: &str = "signal.ingested";
    pub const EVENT_CREATED: &str = "event.created";
    pub const ATTEMPT_RECORDED: &str = "event.attempt_recorded";
    pub const EVENT_RESOLVED: &str = "event.resolved";
    pub const EVENT_ESCALATED: &str = "event.escalated";
    pub const CUSTOMER_ACTION: &str = "event.customer_action";
    pub const ORCHESTRATION_STEP: &str = "orchestration.step";
    pub const GOVERNOR_SWEEP: &str = "governor.sweep";
}

/// Groupings of lifecycle statuses used by queries and guards
pub mod status_groups {
    use super::NdrStatus;

    pub const TERMINAL_STATUSES: &[NdrStatus] = &[NdrStatus::Resolved, NdrStatus::RtoTriggered];

    pub const ACTIVE_STATUSES: &[NdrStatus] = &[
        NdrStatus::Detected,
        NdrStatus::InResolution,
        NdrStatus::CustomerActionRequired,
        NdrStatus::Escalated,
    ];

    /// Statuses in which a customer may still submit a decision
    pub const CUSTOMER_ACTIONABLE_STATUSES: &[NdrStatus] = &[
        NdrStatus::Detected,
        NdrStatus::InResolution,
        NdrStatus::CustomerActionRequired,
    ];
}
