//! # Signal Ingestor
//!
//! Create-or-update entry point for carrier signals. Classifies the signal,
//! then either creates the shipment's NDR event, records a further distinct
//! attempt on the active one, resolves it on delivery, or recognises a
//! redelivery and does nothing.
//!
//! Acknowledgement is fast: the only awaited work is the store round-trips.
//! Notifications, tokens and carrier commands are queued for the
//! [`ResolutionOrchestrator`](super::ResolutionOrchestrator).

use super::attempts::{record_new_attempt, RecordedAttempt};
use super::queue::{ResolutionQueue, ResolutionTask};
use crate::config::EngineConfig;
use crate::constants::{initiators, operations};
use crate::error::{NdrError, Result};
use crate::governor::SellerPolicyResolver;
use crate::logging::log_event_operation;
use crate::models::{
    signal_metadata, ActionOutcome, ActionType, Actor, CarrierSignal, NdrEvent, NormalizedSignal,
    ResolutionAction, SignalKind,
};
use crate::normalizer::{signal_key, SignalNormalizer};
use crate::services::Clock;
use crate::state_machine::{NdrStateMachine, NdrStatus, NdrTransition};
use crate::store::{CreateOutcome, EventMutator, Mutation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Rounds of find-or-create before giving up on a shipment whose event keeps
/// turning terminal underneath us
const CREATE_ROUNDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestDisposition {
    /// First detection for the shipment
    Created,
    /// Distinct further failed attempt on the active event
    AttemptRecorded,
    /// Redelivery of a signal already applied
    Duplicate,
    /// Delivery confirmation closed the active event
    Resolved,
    /// Not a non-delivery signal, or nothing to act on
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: bool,
    pub disposition: IngestDisposition,
    pub event_id: Option<Uuid>,
    pub status: Option<NdrStatus>,
    pub attempt_number: Option<u32>,
}

impl IngestResponse {
    fn for_event(disposition: IngestDisposition, event: &NdrEvent) -> Self {
        Self {
            accepted: true,
            disposition,
            event_id: Some(event.event_id),
            status: Some(event.status),
            attempt_number: Some(event.attempt_number),
        }
    }

    fn ignored() -> Self {
        Self {
            accepted: true,
            disposition: IngestDisposition::Ignored,
            event_id: None,
            status: None,
            attempt_number: None,
        }
    }
}

/// Outcome of applying a repeat signal to an existing event
enum Repeat {
    Duplicate,
    /// The event went terminal before our write; start over
    Terminal,
    Recorded(RecordedAttempt),
    /// A concurrent write moved the event up to the threshold; resolve the policy and retry
    PolicyNeeded,
}

#[derive(Debug, Clone)]
pub struct SignalIngestor {
    normalizer: Arc<SignalNormalizer>,
    mutator: EventMutator,
    policies: SellerPolicyResolver,
    queue: ResolutionQueue,
    clock: Arc<dyn Clock>,
    engine: EngineConfig,
}

impl SignalIngestor {
    pub fn new(
        normalizer: Arc<SignalNormalizer>,
        mutator: EventMutator,
        policies: SellerPolicyResolver,
        queue: ResolutionQueue,
        clock: Arc<dyn Clock>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            normalizer,
            mutator,
            policies,
            queue,
            clock,
            engine,
        }
    }

    pub fn normalizer(&self) -> &Arc<SignalNormalizer> {
        &self.normalizer
    }

    pub async fn ingest(&self, signal: CarrierSignal) -> Result<IngestResponse> {
        signal.validate().map_err(NdrError::Validation)?;

        let now = self.clock.now();
        let normalized = self.normalizer.normalize(&signal);
        let key = signal_key(&signal);

        debug!(
            operation = operations::SIGNAL_INGESTED,
            shipment_reference = %signal.shipment_reference,
            signal_key = %key,
            "Carrier signal received"
        );

        match normalized.kind {
            SignalKind::NonDelivery => self.apply_non_delivery(&signal, &normalized, &key, now).await,
            SignalKind::Delivered => self.apply_delivery(&signal, &normalized, &key, now).await,
            SignalKind::Other => Ok(IngestResponse::ignored()),
        }
    }

    async fn apply_non_delivery(
        &self,
        signal: &CarrierSignal,
        normalized: &NormalizedSignal,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<IngestResponse> {
        let store = self.mutator.store();

        for _ in 0..CREATE_ROUNDS {
            let existing = match store.latest_for_shipment(&signal.shipment_reference).await? {
                Some(latest) if !latest.is_terminal() => Some(latest),
                Some(latest) if latest.has_seen_signal(key, None) => {
                    debug!(
                        event_id = %latest.event_id,
                        "Signal already applied to concluded event"
                    );
                    return Ok(IngestResponse::for_event(IngestDisposition::Duplicate, &latest));
                }
                _ => None,
            };

            let existing = match existing {
                Some(event) => event,
                None => {
                    let candidate =
                        NdrEvent::detect(signal, normalized, key, now, self.engine.resolution_window());
                    match store.create_if_absent(candidate).await? {
                        CreateOutcome::Created(event) => return Ok(self.on_created(&event)),
                        CreateOutcome::Existing(event) => event,
                    }
                }
            };

            if let Some(response) = self.apply_repeat(existing, signal, normalized, key, now).await? {
                return Ok(response);
            }
        }

        warn!(
            shipment_reference = %signal.shipment_reference,
            "Shipment event kept concluding during ingestion"
        );
        Err(NdrError::Storage(format!(
            "could not settle event for shipment {}",
            signal.shipment_reference
        )))
    }

    fn on_created(&self, event: &NdrEvent) -> IngestResponse {
        log_event_operation(
            operations::EVENT_CREATED,
            event.event_id,
            &event.shipment_reference,
            event.status.as_str(),
            Some(event.category.as_str()),
        );
        if event.needs_manual_review {
            warn!(
                event_id = %event.event_id,
                confidence = event.confidence,
                "Low-confidence classification, event flagged for manual review"
            );
        }
        self.queue
            .dispatch(ResolutionTask::start_attempt(event.event_id, event.attempt_number));
        IngestResponse::for_event(IngestDisposition::Created, event)
    }

    async fn apply_repeat(
        &self,
        existing: NdrEvent,
        signal: &CarrierSignal,
        normalized: &NormalizedSignal,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IngestResponse>> {
        if existing.has_seen_signal(key, signal.attempt_number) {
            debug!(event_id = %existing.event_id, "Duplicate carrier signal");
            return Ok(Some(IngestResponse::for_event(IngestDisposition::Duplicate, &existing)));
        }

        let metadata = signal_metadata(signal, key, normalized);
        let threshold = self.engine.attempt_threshold;

        // The seller policy is only read for the write that reaches the attempt threshold
        let mut policy = None;
        let mut current = existing;
        let outcome = loop {
            if policy.is_none() && next_attempt_reaches(&current, threshold) {
                policy = Some(self.policies.policy_for_shipment(&current.shipment_reference).await);
            }
            let outcome = self
                .mutator
                .mutate_from(current, |event| {
                    if event.is_terminal() {
                        return Ok(Mutation::Skip(Repeat::Terminal));
                    }
                    if event.has_seen_signal(key, signal.attempt_number) {
                        return Ok(Mutation::Skip(Repeat::Duplicate));
                    }
                    let effective = match policy {
                        Some(policy) => policy,
                        None if next_attempt_reaches(event, threshold) => {
                            return Ok(Mutation::Skip(Repeat::PolicyNeeded));
                        }
                        None => self.policies.default_policy(),
                    };
                    let recorded = record_new_attempt(
                        event,
                        Actor::Carrier,
                        metadata.clone(),
                        threshold,
                        effective,
                        initiators::INGESTOR,
                        now,
                    )?;
                    Ok(Mutation::Write(Repeat::Recorded(recorded)))
                })
                .await?;
            match outcome.value {
                Repeat::PolicyNeeded => current = outcome.event,
                _ => break outcome,
            }
        };
        let policy = policy.unwrap_or_else(|| self.policies.default_policy());

        let event = outcome.event;
        match outcome.value {
            Repeat::Terminal => Ok(None),
            Repeat::Duplicate | Repeat::PolicyNeeded => {
                Ok(Some(IngestResponse::for_event(IngestDisposition::Duplicate, &event)))
            }
            Repeat::Recorded(recorded) => {
                log_event_operation(
                    operations::ATTEMPT_RECORDED,
                    event.event_id,
                    &event.shipment_reference,
                    event.status.as_str(),
                    Some(&format!("attempt {}", recorded.attempt)),
                );
                if let Some(forced) = recorded.forced {
                    info!(
                        event_id = %event.event_id,
                        attempt = recorded.attempt,
                        status = %forced,
                        policy = %policy,
                        "Attempt threshold reached"
                    );
                }
                if let Some(task) = recorded.follow_up(event.event_id) {
                    self.queue.dispatch(task);
                }
                Ok(Some(IngestResponse::for_event(IngestDisposition::AttemptRecorded, &event)))
            }
        }
    }

    async fn apply_delivery(
        &self,
        signal: &CarrierSignal,
        normalized: &NormalizedSignal,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<IngestResponse> {
        let store = self.mutator.store();
        let Some(latest) = store.latest_for_shipment(&signal.shipment_reference).await? else {
            return Ok(IngestResponse::ignored());
        };
        if latest.is_terminal() {
            let disposition = if latest.has_seen_signal(key, None) {
                IngestDisposition::Duplicate
            } else {
                IngestDisposition::Ignored
            };
            return Ok(IngestResponse::for_event(disposition, &latest));
        }

        let metadata = signal_metadata(signal, key, normalized);
        let outcome = self
            .mutator
            .mutate_from(latest, |event| {
                if event.has_seen_signal(key, None) {
                    return Ok(Mutation::Skip(IngestDisposition::Duplicate));
                }
                if event.is_terminal() {
                    return Ok(Mutation::Skip(IngestDisposition::Ignored));
                }
                NdrStateMachine::apply(event, &NdrTransition::ConfirmDelivered, now)?;
                event.push_action(
                    ResolutionAction::new(
                        ActionType::Resolved,
                        event.attempt_number,
                        Actor::Carrier,
                        ActionOutcome::Success,
                        now,
                    )
                    .with_metadata(metadata.clone()),
                );
                Ok(Mutation::Write(IngestDisposition::Resolved))
            })
            .await?;

        if outcome.written {
            log_event_operation(
                operations::EVENT_RESOLVED,
                outcome.event.event_id,
                &outcome.event.shipment_reference,
                outcome.event.status.as_str(),
                Some("carrier confirmed delivery"),
            );
        }
        Ok(IngestResponse::for_event(outcome.value, &outcome.event))
    }
}

fn next_attempt_reaches(event: &NdrEvent, threshold: u32) -> bool {
    event.attempt_number + 1 >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GovernorConfig;
    use crate::models::NdrCategory;
    use crate::normalizer::RuleRegistry;
    use crate::services::ManualClock;
    use crate::store::{EventStore, InMemoryEventStore};
    use crate::governor::EscalationPolicy;
    use crate::test_helpers::{delivered_signal, ndr_signal, shipment_info, with_event_key, StaticOrderBook};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        ingestor: SignalIngestor,
        store: Arc<InMemoryEventStore>,
        tasks: mpsc::Receiver<ResolutionTask>,
    }

    fn fixture() -> Fixture {
        fixture_with(GovernorConfig::default(), Arc::new(StaticOrderBook::new()))
    }

    fn fixture_with(governor: GovernorConfig, orders: Arc<StaticOrderBook>) -> Fixture {
        let store = Arc::new(InMemoryEventStore::new());
        let (queue, tasks) = ResolutionQueue::channel(64);
        let policies = SellerPolicyResolver::new(governor, orders, Duration::from_millis(50));
        let ingestor = SignalIngestor::new(
            Arc::new(SignalNormalizer::new(RuleRegistry::builtin(), 60)),
            EventMutator::new(store.clone(), 5),
            policies,
            queue,
            Arc::new(ManualClock::new(Utc::now())),
            EngineConfig::default(),
        );
        Fixture {
            ingestor,
            store,
            tasks,
        }
    }

    #[tokio::test]
    async fn test_first_detection_creates_event_and_queues_cycle() {
        let mut f = fixture();
        let response = f
            .ingestor
            .ingest(ndr_signal("X", "S1", "NDR", "customer refused", Some(1)))
            .await
            .unwrap();

        assert!(response.accepted);
        assert_eq!(response.disposition, IngestDisposition::Created);
        assert_eq!(response.attempt_number, Some(1));

        let event = f.store.fetch(response.event_id.unwrap()).await.unwrap();
        assert_eq!(event.category, NdrCategory::Refused);
        assert_eq!(event.status, NdrStatus::Detected);
        assert_eq!(
            f.tasks.try_recv().unwrap(),
            ResolutionTask::start_attempt(event.event_id, 1)
        );
    }

    #[tokio::test]
    async fn test_redelivered_signal_is_noop() {
        let mut f = fixture();
        let signal = ndr_signal("X", "S1", "NDR", "customer refused", Some(1));

        let first = f.ingestor.ingest(signal.clone()).await.unwrap();
        let second = f.ingestor.ingest(signal).await.unwrap();

        assert_eq!(second.disposition, IngestDisposition::Duplicate);
        assert_eq!(second.event_id, first.event_id);
        let event = f.store.fetch(first.event_id.unwrap()).await.unwrap();
        assert_eq!(event.attempt_number, 1);
        assert_eq!(event.resolution_actions.len(), 1);

        f.tasks.try_recv().unwrap();
        assert!(f.tasks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_distinct_attempts_increment_once_each() {
        let f = fixture();
        let first = f
            .ingestor
            .ingest(with_event_key(ndr_signal("X", "S1", "CNA", "door locked", None), "evt-1"))
            .await
            .unwrap();
        let second = f
            .ingestor
            .ingest(with_event_key(ndr_signal("X", "S1", "CNA", "door locked", None), "evt-2"))
            .await
            .unwrap();
        let again = f
            .ingestor
            .ingest(with_event_key(ndr_signal("X", "S1", "CNA", "door locked", None), "evt-2"))
            .await
            .unwrap();

        assert_eq!(second.disposition, IngestDisposition::AttemptRecorded);
        assert_eq!(second.attempt_number, Some(2));
        assert_eq!(again.disposition, IngestDisposition::Duplicate);
        assert_eq!(first.event_id, second.event_id);
    }

    #[tokio::test]
    async fn test_seller_policy_read_only_when_threshold_is_reached() {
        let orders = Arc::new(StaticOrderBook::new());
        orders.insert(shipment_info("S1", "seller-auto", false));
        let mut governor = GovernorConfig::default();
        governor
            .seller_policies
            .insert("seller-auto".to_string(), EscalationPolicy::AutoRto);
        let f = fixture_with(governor, orders.clone());

        for attempt in 1..=2 {
            f.ingestor
                .ingest(ndr_signal("X", "S1", "CNA", "door locked", Some(attempt)))
                .await
                .unwrap();
        }
        assert_eq!(orders.lookups(), 0);

        let third = f
            .ingestor
            .ingest(ndr_signal("X", "S1", "CNA", "door locked", Some(3)))
            .await
            .unwrap();
        assert_eq!(orders.lookups(), 1);
        assert_eq!(third.attempt_number, Some(3));
        assert_eq!(third.status, Some(NdrStatus::RtoTriggered));
    }

    #[tokio::test]
    async fn test_in_transit_update_is_ignored() {
        let f = fixture();
        let response = f
            .ingestor
            .ingest(ndr_signal("X", "S1", "IT", "shipment in transit", None))
            .await
            .unwrap();

        assert_eq!(response.disposition, IngestDisposition::Ignored);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_delivery_resolves_active_event() {
        let f = fixture();
        let created = f
            .ingestor
            .ingest(ndr_signal("X", "S1", "NDR", "door locked", Some(1)))
            .await
            .unwrap();

        let resolved = f.ingestor.ingest(delivered_signal("X", "S1")).await.unwrap();
        assert_eq!(resolved.disposition, IngestDisposition::Resolved);
        assert_eq!(resolved.status, Some(NdrStatus::Resolved));

        let event = f.store.fetch(created.event_id.unwrap()).await.unwrap();
        assert!(event.resolved_at.is_some());
        assert_eq!(event.actions_of(ActionType::Resolved).count(), 1);

        // Same delivery callback again
        let again = f.ingestor.ingest(delivered_signal("X", "S1")).await.unwrap();
        assert_eq!(again.disposition, IngestDisposition::Duplicate);
    }

    #[tokio::test]
    async fn test_new_failure_after_conclusion_opens_new_event() {
        let f = fixture();
        let first = f
            .ingestor
            .ingest(ndr_signal("X", "S1", "NDR", "door locked", Some(1)))
            .await
            .unwrap();
        f.ingestor.ingest(delivered_signal("X", "S1")).await.unwrap();

        let replay = f
            .ingestor
            .ingest(ndr_signal("X", "S1", "NDR", "door locked", Some(1)))
            .await
            .unwrap();
        assert_eq!(replay.disposition, IngestDisposition::Duplicate);

        let fresh = f
            .ingestor
            .ingest(ndr_signal("X", "S1", "NDR", "wrong address", Some(1)))
            .await
            .unwrap();
        assert_eq!(fresh.disposition, IngestDisposition::Created);
        assert_ne!(fresh.event_id, first.event_id);
    }

    #[tokio::test]
    async fn test_invalid_signal_rejected() {
        let f = fixture();
        let err = f
            .ingestor
            .ingest(ndr_signal("X", " ", "NDR", "door locked", None))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "validation_error");
    }
}
