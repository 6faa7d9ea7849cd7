//! Whole engine over an in-memory store, a manual clock and recording doubles.
//!
//! Resolution tasks are not consumed in the background: tests call
//! [`TestEngine::drain`] to run side effects deterministically, or
//! [`TestEngine::next_task`] to inspect what was queued.

use super::doubles::{RecordingCarrier, RecordingNotifier, RecordingOrderCommands, StaticOrderBook};
use crate::bootstrap::{ExternalServices, NdrCore};
use crate::config::NdrConfig;
use crate::constants::templates;
use crate::governor::{EscalationGovernor, EscalationPolicy};
use crate::models::{CarrierSignal, NdrEvent};
use crate::normalizer::RuleRegistry;
use crate::orchestration::{
    AdminOverrides, IngestResponse, ResolutionOrchestrator, ResolutionTask, SignalIngestor, TaskReport,
};
use crate::resilience::RetryConfig;
use crate::resolution::CustomerActionHandler;
use crate::services::{Clock, ManualClock};
use crate::store::{EventStore, InMemoryEventStore};
use crate::tokens::CapabilityTokenService;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_TOKEN_SECRET: &str = "test-secret-for-resolution-tokens";

/// Fixed start instant for the manual clock
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Engine configuration with fast retries and a known token secret
pub fn test_config() -> NdrConfig {
    let mut config = NdrConfig::default();
    config.tokens.secret = TEST_TOKEN_SECRET.to_string();
    config.carrier_commands = RetryConfig {
        max_attempts: 2,
        timeout_ms: 200,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        backoff_multiplier: 2.0,
    };
    config.orchestrator.collaborator_timeout_ms = 200;
    config.web.enabled = false;
    config
}

pub struct TestEngine {
    pub core: NdrCore,
    pub store: Arc<InMemoryEventStore>,
    pub clock: Arc<ManualClock>,
    pub carrier: Arc<RecordingCarrier>,
    pub notifier: Arc<RecordingNotifier>,
    pub orders: Arc<StaticOrderBook>,
    pub order_commands: Arc<RecordingOrderCommands>,
    pub ingestor: Arc<SignalIngestor>,
    pub orchestrator: Arc<ResolutionOrchestrator>,
    pub customer: Arc<CustomerActionHandler>,
    pub admin: Arc<AdminOverrides>,
    pub governor: Arc<EscalationGovernor>,
    pub tokens: CapabilityTokenService,
    tasks: mpsc::Receiver<ResolutionTask>,
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_policy(policy: EscalationPolicy) -> Self {
        let mut config = test_config();
        config.governor.default_policy = policy;
        Self::with_config(config)
    }

    pub fn with_config(config: NdrConfig) -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(ManualClock::new(test_epoch()));
        let carrier = Arc::new(RecordingCarrier::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let orders = Arc::new(StaticOrderBook::new());
        let order_commands = Arc::new(RecordingOrderCommands::new());

        let services = ExternalServices {
            carrier: carrier.clone(),
            notifier: notifier.clone(),
            orders: orders.clone(),
            order_commands: order_commands.clone(),
        };
        let (core, tasks) = NdrCore::new(config, RuleRegistry::builtin(), store.clone(), services, clock.clone())
            .expect("test engine configuration is valid");

        Self {
            ingestor: Arc::clone(&core.ingestor),
            orchestrator: Arc::clone(&core.orchestrator),
            customer: Arc::clone(&core.customer),
            admin: Arc::clone(&core.admin),
            governor: Arc::clone(&core.governor),
            tokens: core.tokens.clone(),
            core,
            store,
            clock,
            carrier,
            notifier,
            orders,
            order_commands,
            tasks,
        }
    }

    /// Ingest and return the event id the signal landed on
    pub async fn ingest(&self, signal: CarrierSignal) -> Uuid {
        self.ingest_response(signal)
            .await
            .event_id
            .expect("signal was applied to an event")
    }

    pub async fn ingest_response(&self, signal: CarrierSignal) -> IngestResponse {
        self.ingestor.ingest(signal).await.expect("ingest succeeds")
    }

    /// Run every queued resolution task, including follow-ups they queue
    pub async fn drain(&mut self) -> Vec<TaskReport> {
        self.orchestrator
            .drain(&mut self.tasks)
            .await
            .expect("resolution tasks succeed")
    }

    pub fn next_task(&mut self) -> Option<ResolutionTask> {
        self.tasks.try_recv().ok()
    }

    pub async fn event(&self, event_id: Uuid) -> NdrEvent {
        self.store.fetch(event_id).await.expect("event exists")
    }

    /// Token from the most recent customer notification for this event
    pub fn latest_token(&self, event_id: Uuid) -> String {
        self.notifier
            .sent_with_template(templates::CUSTOMER_ACTION_REQUIRED)
            .iter()
            .rev()
            .filter_map(|sent| sent.data["resolution_url"].as_str())
            .filter_map(|url| url.rsplit('/').next())
            .find(|token| {
                self.tokens
                    .decode(token, self.clock.now())
                    .is_ok_and(|claims| claims.eid == event_id)
            })
            .map(str::to_string)
            .expect("customer was sent a resolution link")
    }
}
