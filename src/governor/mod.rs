//! # Escalation Governor
//!
//! Periodic sweep that forces a policy outcome on events that ran out of
//! attempts or out of time. Runs on its own timer, concurrently with
//! ingestion and customer actions.
//!
//! A lost compare-and-set is never retried within a sweep. The event is
//! re-read and re-evaluated on the next cycle.

pub mod policy;

pub use policy::{EscalationPolicy, SellerPolicyResolver};

use crate::config::{EngineConfig, GovernorConfig};
use crate::constants::{escalation_reasons, initiators, operations};
use crate::error::{NdrError, Result};
use crate::logging::{log_error, log_event_operation};
use crate::models::NdrEvent;
use crate::orchestration::{ResolutionQueue, ResolutionTask};
use crate::services::Clock;
use crate::state_machine::{NdrStateMachine, NdrStatus};
use crate::store::{EventMutator, Mutation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Tally of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub escalated: usize,
    pub rto_triggered: usize,
    /// Lost compare-and-set; re-evaluated next cycle
    pub conflicts: usize,
    /// No longer eligible, or left alone by policy
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn transitioned(&self) -> usize {
        self.escalated + self.rto_triggered
    }
}

#[derive(Debug)]
pub struct EscalationGovernor {
    mutator: EventMutator,
    policies: SellerPolicyResolver,
    queue: ResolutionQueue,
    clock: Arc<dyn Clock>,
    engine: EngineConfig,
    config: GovernorConfig,
}

impl EscalationGovernor {
    pub fn new(
        mutator: &EventMutator,
        policies: SellerPolicyResolver,
        queue: ResolutionQueue,
        clock: Arc<dyn Clock>,
        engine: EngineConfig,
        config: GovernorConfig,
    ) -> Self {
        Self {
            mutator: mutator.with_max_retries(0),
            policies,
            queue,
            clock,
            engine,
            config,
        }
    }

    /// Sweep every `governor.sweep_interval_seconds` until shutdown
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.config.sweep_interval();
            info!(
                interval_seconds = interval.as_secs(),
                batch_size = self.config.batch_size,
                "🚀 Escalation governor started"
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = self.sweep_once().await {
                            log_error("escalation_governor", "sweep", &e.to_string(), None);
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("🛑 Escalation governor shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let threshold = self.engine.attempt_threshold;
        let candidates = self
            .mutator
            .store()
            .sweep_candidates(now, threshold, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for candidate in candidates {
            let event_id = candidate.event_id;
            let policy = self.policies.policy_for_shipment(&candidate.shipment_reference).await;

            let outcome = self
                .mutator
                .mutate_from(candidate, |event| {
                    let Some(reason) = escalation_reason(event, threshold, now) else {
                        return Ok(Mutation::Skip(None));
                    };
                    let Some(transition) = policy.transition_for(event.status, reason) else {
                        return Ok(Mutation::Skip(None));
                    };
                    let applied = NdrStateMachine::force(event, transition, initiators::GOVERNOR, now)?;
                    Ok(Mutation::Write(Some(applied.to)))
                })
                .await;

            match outcome {
                Ok(outcome) => match outcome.value {
                    Some(status) if outcome.written => {
                        let follow_up = if status == NdrStatus::RtoTriggered {
                            report.rto_triggered += 1;
                            ResolutionTask::return_to_origin(event_id)
                        } else {
                            report.escalated += 1;
                            ResolutionTask::escalated(event_id)
                        };
                        log_event_operation(
                            operations::EVENT_ESCALATED,
                            event_id,
                            &outcome.event.shipment_reference,
                            status.as_str(),
                            outcome.event.escalations.last().map(|record| record.reason.as_str()),
                        );
                        self.queue.dispatch(follow_up);
                    }
                    _ => report.skipped += 1,
                },
                Err(NdrError::StaleWrite { .. }) => {
                    debug!(event_id = %event_id, "Event changed during sweep, deferring to next cycle");
                    report.conflicts += 1;
                }
                Err(e) => {
                    log_error(
                        "escalation_governor",
                        "force_transition",
                        &e.to_string(),
                        Some(&event_id.to_string()),
                    );
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                operation = operations::GOVERNOR_SWEEP,
                examined = report.examined,
                escalated = report.escalated,
                rto_triggered = report.rto_triggered,
                conflicts = report.conflicts,
                skipped = report.skipped,
                failed = report.failed,
                "Escalation sweep complete"
            );
        } else {
            debug!("Escalation sweep found no candidates");
        }
        Ok(report)
    }
}

/// Why an event is due for a forced outcome, if it is
fn escalation_reason(event: &NdrEvent, threshold: u32, now: DateTime<Utc>) -> Option<&'static str> {
    if event.is_terminal() {
        None
    } else if event.attempts_exhausted(threshold) {
        Some(escalation_reasons::ATTEMPT_THRESHOLD_REACHED)
    } else if event.is_overdue(now) {
        Some(escalation_reasons::DEADLINE_EXCEEDED)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ndr_signal, TestEngine};
    use chrono::Duration;

    #[tokio::test]
    async fn test_sweep_escalates_overdue_event() {
        let mut engine = TestEngine::new();
        let event_id = engine.ingest(ndr_signal("X", "S1", "REFUSED", "refused", Some(1))).await;
        engine.drain().await;

        engine.clock.advance(Duration::hours(49));
        let report = engine.governor.sweep_once().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.escalated, 1);
        let event = engine.event(event_id).await;
        assert_eq!(event.status, NdrStatus::Escalated);
        assert_eq!(event.escalations[0].reason, "deadline_exceeded");
        assert_eq!(event.escalations[0].actor, "escalation_governor");
        assert_eq!(engine.next_task(), Some(ResolutionTask::escalated(event_id)));
    }

    #[tokio::test]
    async fn test_sweep_leaves_events_within_deadline() {
        let mut engine = TestEngine::new();
        engine.ingest(ndr_signal("X", "S1", "REFUSED", "refused", Some(1))).await;
        engine.drain().await;

        engine.clock.advance(Duration::hours(47));
        let report = engine.governor.sweep_once().await.unwrap();

        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_manual_policy_skips_escalated_event_on_later_sweeps() {
        let mut engine = TestEngine::new();
        engine.ingest(ndr_signal("X", "S1", "REFUSED", "refused", Some(1))).await;
        engine.drain().await;
        engine.clock.advance(Duration::hours(49));
        engine.governor.sweep_once().await.unwrap();

        let second = engine.governor.sweep_once().await.unwrap();

        assert_eq!(second.examined, 1);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.transitioned(), 0);
    }

    #[tokio::test]
    async fn test_auto_rto_policy_returns_overdue_event() {
        let mut engine = TestEngine::with_policy(EscalationPolicy::AutoRto);
        let event_id = engine.ingest(ndr_signal("X", "S1", "REFUSED", "refused", Some(1))).await;
        engine.drain().await;

        engine.clock.advance(Duration::hours(49));
        let report = engine.governor.sweep_once().await.unwrap();

        assert_eq!(report.rto_triggered, 1);
        assert_eq!(engine.event(event_id).await.status, NdrStatus::RtoTriggered);
        assert_eq!(engine.next_task(), Some(ResolutionTask::return_to_origin(event_id)));
    }

    #[test]
    fn test_escalation_reason_prefers_attempt_threshold() {
        let now = Utc::now();
        let mut event = crate::test_helpers::detected_event("S1", now - Duration::hours(50));
        assert_eq!(escalation_reason(&event, 3, now), Some("deadline_exceeded"));

        event.attempt_number = 3;
        assert_eq!(escalation_reason(&event, 3, now), Some("attempt_threshold_reached"));

        event.status = NdrStatus::Resolved;
        assert_eq!(escalation_reason(&event, 3, now), None);
    }
}
