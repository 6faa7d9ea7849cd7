//! # NDR Engine Configuration
//!
//! Layered configuration loaded through the `config` crate:
//!
//! 1. compiled defaults ([`NdrConfig::default`])
//! 2. `config/ndr.toml`
//! 3. `config/ndr.{environment}.toml`
//! 4. environment variables prefixed `NDR`, sections separated by `__`
//!    (e.g. `NDR__TOKENS__SECRET`, `NDR__GOVERNOR__DEFAULT_POLICY=auto_rto`)
//!
//! File layers are optional; a bare checkout runs on defaults plus whatever
//! the environment provides.
//!
//! ```rust,no_run
//! use ndr_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let threshold = manager.config().engine.attempt_threshold;
//! let policy = manager.config().governor.policy_for("seller-42");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::defaults;
use crate::governor::EscalationPolicy;
use crate::models::NdrCategory;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Minimum token secret length outside the test environment
pub const MIN_TOKEN_SECRET_LEN: usize = 32;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NdrConfig {
    pub engine: EngineConfig,
    pub tokens: TokenConfig,
    pub orchestrator: OrchestratorConfig,
    pub carrier_commands: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub governor: GovernorConfig,
    pub rules: RulesConfig,
    pub web: WebConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempt count at which an event is escalated
    pub attempt_threshold: u32,
    pub resolution_deadline_hours: i64,
    /// How far ahead a customer may reschedule
    pub reschedule_window_days: i64,
    /// Classifications below this confidence become `other` and are flagged for review
    pub min_classification_confidence: u8,
    /// Compare-and-set retries for request-path writers
    pub cas_max_retries: u32,
    /// Categories that cannot progress without the customer
    pub customer_decision_categories: Vec<NdrCategory>,
    /// Categories that get a carrier reattempt without waiting for the customer
    pub auto_reattempt_categories: Vec<NdrCategory>,
}

impl EngineConfig {
    pub fn resolution_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.resolution_deadline_hours)
    }

    pub fn reschedule_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.reschedule_window_days)
    }

    pub fn requires_customer_decision(&self, category: NdrCategory) -> bool {
        self.customer_decision_categories.contains(&category)
    }

    pub fn auto_reattempts(&self, category: NdrCategory) -> bool {
        self.auto_reattempt_categories.contains(&category)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attempt_threshold: defaults::ATTEMPT_THRESHOLD,
            resolution_deadline_hours: defaults::RESOLUTION_DEADLINE_HOURS,
            reschedule_window_days: defaults::RESCHEDULE_WINDOW_DAYS,
            min_classification_confidence: defaults::MIN_CLASSIFICATION_CONFIDENCE,
            cas_max_retries: defaults::CAS_MAX_RETRIES,
            customer_decision_categories: vec![NdrCategory::AddressIssue, NdrCategory::PaymentIssue],
            auto_reattempt_categories: vec![NdrCategory::CustomerUnavailable],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HMAC signing key
    pub secret: String,
    pub ttl_days: i64,
}

impl TokenConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.ttl_days)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_days: defaults::TOKEN_TTL_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub queue_capacity: usize,
    /// Tasks processed concurrently
    pub max_concurrency: usize,
    pub notify_seller: bool,
    /// Customer resolution links are `{resolution_url_base}/{token}`
    pub resolution_url_base: String,
    /// Bound on notifier and order read model calls
    pub collaborator_timeout_ms: u64,
    /// Time allowed for queued side effects to drain on shutdown
    pub shutdown_timeout_seconds: u64,
}

impl OrchestratorConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn resolution_url(&self, token: &str) -> String {
        format!("{}/{token}", self.resolution_url_base.trim_end_matches('/'))
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::ORCHESTRATOR_QUEUE_CAPACITY,
            max_concurrency: 16,
            notify_seller: true,
            resolution_url_base: "http://localhost:8080/v1/resolve".to_string(),
            collaborator_timeout_ms: 5_000,
            shutdown_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub enabled: bool,
    pub sweep_interval_seconds: u64,
    pub batch_size: usize,
    pub default_policy: EscalationPolicy,
    /// Seller id → policy override
    pub seller_policies: HashMap<String, EscalationPolicy>,
}

impl GovernorConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Policy for a seller. Seller ids compare case-insensitively because the
    /// environment-variable layer lowercases map keys.
    pub fn policy_for(&self, seller_id: &str) -> EscalationPolicy {
        let wanted = seller_id.trim().to_lowercase();
        self.seller_policies
            .iter()
            .find(|(seller, _)| seller.to_lowercase() == wanted)
            .map(|(_, policy)| *policy)
            .unwrap_or(self.default_policy)
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_seconds: defaults::GOVERNOR_SWEEP_INTERVAL_SECONDS,
            batch_size: defaults::GOVERNOR_BATCH_SIZE,
            default_policy: EscalationPolicy::ManualEscalation,
            seller_policies: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// TOML or JSON rule file; relative paths resolve against the config directory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub request_timeout_ms: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; when unset the in-memory store is used
    pub url: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; `RUST_LOG` takes precedence when set
    pub level: Option<String>,
    pub format: LogFormat,
}

impl NdrConfig {
    /// Validate cross-field constraints. Token secrets may be short only in `test`.
    pub fn validate(&self, environment: &str) -> ConfigResult<()> {
        let engine = &self.engine;
        if engine.attempt_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.attempt_threshold",
                "0",
                "must be at least 1",
            ));
        }
        if engine.resolution_deadline_hours <= 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.resolution_deadline_hours",
                engine.resolution_deadline_hours.to_string(),
                "must be positive",
            ));
        }
        if engine.reschedule_window_days <= 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.reschedule_window_days",
                engine.reschedule_window_days.to_string(),
                "must be positive",
            ));
        }
        if engine.min_classification_confidence > 100 {
            return Err(ConfigurationError::invalid_value(
                "engine.min_classification_confidence",
                engine.min_classification_confidence.to_string(),
                "must be between 0 and 100",
            ));
        }
        if let Some(category) = engine
            .auto_reattempt_categories
            .iter()
            .find(|c| engine.customer_decision_categories.contains(c))
        {
            return Err(ConfigurationError::invalid_value(
                "engine.auto_reattempt_categories",
                category.as_str(),
                "category also requires a customer decision",
            ));
        }

        if self.tokens.ttl_days <= 0 {
            return Err(ConfigurationError::invalid_value(
                "tokens.ttl_days",
                self.tokens.ttl_days.to_string(),
                "must be positive",
            ));
        }
        if self.tokens.secret.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "secret",
                "tokens (set NDR__TOKENS__SECRET)",
            ));
        }
        if environment != "test" && self.tokens.secret.len() < MIN_TOKEN_SECRET_LEN {
            return Err(ConfigurationError::invalid_value(
                "tokens.secret",
                "[REDACTED]",
                format!("must be at least {MIN_TOKEN_SECRET_LEN} bytes"),
            ));
        }

        if self.orchestrator.queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.queue_capacity",
                "0",
                "must be at least 1",
            ));
        }
        if self.orchestrator.max_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.max_concurrency",
                "0",
                "must be at least 1",
            ));
        }
        if self.orchestrator.collaborator_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.collaborator_timeout_ms",
                "0",
                "must be positive",
            ));
        }
        if self.orchestrator.resolution_url_base.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "resolution_url_base",
                "orchestrator",
            ));
        }

        self.carrier_commands
            .validate()
            .map_err(|e| ConfigurationError::invalid_value("carrier_commands", "", e))?;
        self.circuit_breaker
            .validate()
            .map_err(|e| ConfigurationError::invalid_value("circuit_breaker", "", e))?;

        if self.governor.sweep_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "governor.sweep_interval_seconds",
                "0",
                "must be at least 1",
            ));
        }
        if self.governor.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "governor.batch_size",
                "0",
                "must be at least 1",
            ));
        }

        if self.web.enabled && self.web.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigurationError::invalid_value(
                "web.bind_address",
                self.web.bind_address.clone(),
                "must be a socket address like 0.0.0.0:8080",
            ));
        }

        if self.database.url.as_deref().is_some_and(|url| url.trim().is_empty()) {
            return Err(ConfigurationError::invalid_value(
                "database.url",
                "",
                "leave unset to use the in-memory store",
            ));
        }

        Ok(())
    }
}
