//! # Resolution Orchestrator
//!
//! Executes the side effects owed after a state change: customer
//! notification with a capability token, seller alerts, automatic carrier
//! reattempts and return-to-origin follow-ups.
//!
//! Tasks arrive over the [`ResolutionQueue`]. Every step re-reads the event,
//! checks the audit trail for the same step on the same attempt, and appends
//! its own outcome once it completes. Redelivered tasks therefore do not
//! repeat completed side effects, and a failed side effect never undoes the
//! persisted state change that caused it.

use super::attempts::record_new_attempt;
use super::queue::{ResolutionQueue, ResolutionTask, TaskKind};
use crate::config::{EngineConfig, OrchestratorConfig};
use crate::constants::{initiators, operations, templates};
use crate::error::Result;
use crate::governor::SellerPolicyResolver;
use crate::logging::{log_error, log_event_operation};
use crate::models::{ActionOutcome, ActionType, Actor, NdrEvent, ResolutionAction};
use crate::services::{
    Clock, Contact, Notifier, OrderReadModel, ProtectedCarrierCommands, ReattemptParams, ShipmentInfo,
};
use crate::state_machine::{NdrStateMachine, NdrStatus, NdrTransition};
use crate::store::{EventMutator, Mutation};
use crate::tokens::CapabilityTokenService;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// External collaborators the orchestrator drives
#[derive(Debug, Clone)]
pub struct OrchestratorCollaborators {
    pub notifier: Arc<dyn Notifier>,
    pub orders: Arc<dyn OrderReadModel>,
    pub carrier: ProtectedCarrierCommands,
}

/// What one task did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub event_id: Uuid,
    pub task: String,
    pub completed: Vec<ActionType>,
    pub failed: Vec<ActionType>,
    /// Set when the task no longer applied to the event
    pub skipped: Option<String>,
}

impl TaskReport {
    fn new(task: &ResolutionTask) -> Self {
        Self {
            event_id: task.event_id,
            task: task.name().to_string(),
            ..Self::default()
        }
    }

    fn note(&mut self, action_type: ActionType, outcome: ActionOutcome) {
        match outcome {
            ActionOutcome::Success => self.completed.push(action_type),
            ActionOutcome::Failed => self.failed.push(action_type),
            ActionOutcome::Skipped => {}
        }
    }

    fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skipped = Some(reason.into());
        self
    }
}

#[derive(Debug)]
pub struct ResolutionOrchestrator {
    mutator: EventMutator,
    tokens: CapabilityTokenService,
    collaborators: OrchestratorCollaborators,
    policies: SellerPolicyResolver,
    queue: ResolutionQueue,
    clock: Arc<dyn Clock>,
    engine: EngineConfig,
    config: OrchestratorConfig,
}

impl ResolutionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mutator: EventMutator,
        tokens: CapabilityTokenService,
        collaborators: OrchestratorCollaborators,
        policies: SellerPolicyResolver,
        queue: ResolutionQueue,
        clock: Arc<dyn Clock>,
        engine: EngineConfig,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            mutator,
            tokens,
            collaborators,
            policies,
            queue,
            clock,
            engine,
            config,
        }
    }

    /// Consume tasks until the channel closes or shutdown is signalled, then
    /// drain what is already queued within the shutdown timeout.
    pub fn start(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<ResolutionTask>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                max_concurrency = self.config.max_concurrency,
                "🚀 Resolution orchestrator started"
            );
            let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
            let mut in_flight = JoinSet::new();

            loop {
                // A free slot is taken before a task is pulled off the queue
                let permit = tokio::select! {
                    acquired = Arc::clone(&permits).acquire_owned() => match acquired {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = shutdown.changed() => {
                        debug!("Shutdown signal received while all workers were busy");
                        break;
                    }
                };

                tokio::select! {
                    received = receiver.recv() => {
                        let Some(task) = received else { break };
                        let this = Arc::clone(&self);
                        in_flight.spawn(async move {
                            let _permit = permit;
                            this.handle(task).await;
                        });
                    }
                    Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                    _ = shutdown.changed() => {
                        debug!("Shutdown signal received by resolution orchestrator");
                        break;
                    }
                }
            }

            receiver.close();
            let mut drained = 0usize;
            let drain = async {
                while let Ok(task) = receiver.try_recv() {
                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else { break };
                    let this = Arc::clone(&self);
                    in_flight.spawn(async move {
                        let _permit = permit;
                        this.handle(task).await;
                    });
                    drained += 1;
                }
                while in_flight.join_next().await.is_some() {}
            };
            let settled = tokio::time::timeout(self.config.shutdown_timeout(), drain).await.is_ok();
            if !settled {
                warn!(
                    remaining = in_flight.len(),
                    "Resolution tasks still running at shutdown timeout, aborting"
                );
                in_flight.abort_all();
            }
            info!(drained = drained, "🛑 Resolution orchestrator stopped");
        })
    }

    /// Process everything currently queued, including follow-ups queued along the way.
    /// Used where side effects must complete deterministically, such as tests.
    pub async fn drain(&self, receiver: &mut mpsc::Receiver<ResolutionTask>) -> Result<Vec<TaskReport>> {
        let mut reports = Vec::new();
        while let Ok(task) = receiver.try_recv() {
            reports.push(self.process(task).await?);
        }
        Ok(reports)
    }

    async fn handle(&self, task: ResolutionTask) {
        match self.process(task).await {
            Ok(report) => debug!(
                event_id = %report.event_id,
                task = %report.task,
                completed = ?report.completed,
                failed = ?report.failed,
                skipped = ?report.skipped,
                "Resolution task finished"
            ),
            Err(e) => log_error(
                "resolution_orchestrator",
                task.name(),
                &e.to_string(),
                Some(&task.event_id.to_string()),
            ),
        }
    }

    pub async fn process(&self, task: ResolutionTask) -> Result<TaskReport> {
        let report = TaskReport::new(&task);
        match task.kind {
            TaskKind::StartAttempt { attempt } => self.start_attempt(report, attempt).await,
            TaskKind::Escalated => self.escalated(report).await,
            TaskKind::ReturnToOrigin => self.return_to_origin(report).await,
        }
    }

    async fn start_attempt(&self, mut report: TaskReport, attempt: u32) -> Result<TaskReport> {
        let event_id = report.event_id;
        let event = self.mutator.store().fetch(event_id).await?;
        if !attempt_is_current(&event, attempt) {
            return Ok(report.skip(format!(
                "event is {} at attempt {}",
                event.status, event.attempt_number
            )));
        }

        log_event_operation(
            operations::ORCHESTRATION_STEP,
            event_id,
            &event.shipment_reference,
            event.status.as_str(),
            Some(&format!("start attempt {attempt}")),
        );

        let needs_customer = self.engine.requires_customer_decision(event.category);
        if !needs_customer {
            self.begin_resolution(&mut report, attempt).await?;
        }

        let shipment = self.lookup_shipment(&mut report, &event, attempt).await?;

        if !event.has_succeeded_action_for_attempt(ActionType::CustomerNotified, attempt) {
            self.issue_and_notify_customer(&mut report, &event, attempt, shipment.as_ref())
                .await?;
        }

        if needs_customer {
            self.await_customer(&mut report, attempt).await?;
        }

        if self.config.notify_seller {
            if let Some(info) = &shipment {
                if !has_notification(&event, templates::SELLER_NDR_ALERT, attempt) {
                    let data = json!({
                        "shipment_reference": event.shipment_reference,
                        "order_id": info.order_id,
                        "category": event.category,
                        "raw_reason": event.raw_reason,
                        "attempt": attempt,
                        "needs_manual_review": event.needs_manual_review,
                        "resolution_deadline": event.resolution_deadline,
                    });
                    self.notify_and_record(&mut report, event_id, attempt, &info.seller, templates::SELLER_NDR_ALERT, data)
                        .await?;
                }
            }
        }

        if !needs_customer
            && self.engine.auto_reattempts(event.category)
            && !event.has_succeeded_action_for_attempt(ActionType::ReattemptRequested, attempt)
        {
            self.auto_reattempt(&mut report, &event, attempt).await?;
        }

        Ok(report)
    }

    /// `detected → in_resolution` for categories that do not wait on the customer
    async fn begin_resolution(&self, report: &mut TaskReport, attempt: u32) -> Result<()> {
        let now = self.clock.now();
        let outcome = self
            .mutator
            .mutate(report.event_id, |event| {
                if !attempt_is_current(event, attempt)
                    || event.status != NdrStatus::Detected
                    || event.has_action_for_attempt(ActionType::ResolutionStarted, attempt)
                {
                    return Ok(Mutation::Skip(()));
                }
                NdrStateMachine::apply(event, &NdrTransition::BeginResolution, now)?;
                event.push_action(system_action(ActionType::ResolutionStarted, attempt, ActionOutcome::Success, now));
                Ok(Mutation::Write(()))
            })
            .await?;
        if outcome.written {
            report.note(ActionType::ResolutionStarted, ActionOutcome::Success);
        }
        Ok(())
    }

    /// `→ customer_action_required` once the customer holds a link, unless they already decided
    async fn await_customer(&self, report: &mut TaskReport, attempt: u32) -> Result<()> {
        let now = self.clock.now();
        let outcome = self
            .mutator
            .mutate(report.event_id, |event| {
                if !attempt_is_current(event, attempt)
                    || event.customer_decision().is_some()
                    || !NdrStateMachine::can_apply(event, &NdrTransition::AwaitCustomer)
                {
                    return Ok(Mutation::Skip(()));
                }
                NdrStateMachine::apply(event, &NdrTransition::AwaitCustomer, now)?;
                event.push_action(system_action(ActionType::AwaitingCustomer, attempt, ActionOutcome::Success, now));
                Ok(Mutation::Write(()))
            })
            .await?;
        if outcome.written {
            report.note(ActionType::AwaitingCustomer, ActionOutcome::Success);
        }
        Ok(())
    }

    async fn lookup_shipment(
        &self,
        report: &mut TaskReport,
        event: &NdrEvent,
        attempt: u32,
    ) -> Result<Option<ShipmentInfo>> {
        let lookup = tokio::time::timeout(
            self.config.collaborator_timeout(),
            self.collaborators.orders.shipment_info(&event.shipment_reference),
        )
        .await;

        let error = match lookup {
            Ok(Ok(Some(info))) => return Ok(Some(info)),
            Ok(Ok(None)) => "shipment not found in order read model".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("lookup timed out after {}ms", self.config.collaborator_timeout_ms),
        };

        warn!(
            event_id = %event.event_id,
            shipment_reference = %event.shipment_reference,
            error = %error,
            "Shipment lookup failed, continuing without contacts"
        );
        if !event.has_action_for_attempt(ActionType::ShipmentLookup, attempt) {
            let now = self.clock.now();
            self.append(
                report,
                system_action(ActionType::ShipmentLookup, attempt, ActionOutcome::Failed, now)
                    .with_metadata(json!({ "error": error })),
            )
            .await?;
        }
        Ok(None)
    }

    async fn issue_and_notify_customer(
        &self,
        report: &mut TaskReport,
        event: &NdrEvent,
        attempt: u32,
        shipment: Option<&ShipmentInfo>,
    ) -> Result<()> {
        let now = self.clock.now();
        let issued = self.tokens.issue(event.event_id, now)?;
        self.append(
            report,
            system_action(ActionType::TokenIssued, attempt, ActionOutcome::Success, now).with_metadata(json!({
                "token_id": issued.token_id,
                "expires_at": issued.expires_at,
            })),
        )
        .await?;

        let Some(customer) = shipment.map(|info| &info.customer).filter(|c| c.is_reachable()) else {
            self.append(
                report,
                system_action(ActionType::CustomerNotified, attempt, ActionOutcome::Skipped, now)
                    .with_metadata(json!({
                        "template": templates::CUSTOMER_ACTION_REQUIRED,
                        "reason": "no reachable customer contact",
                    })),
            )
            .await?;
            return Ok(());
        };

        let data = json!({
            "shipment_reference": event.shipment_reference,
            "customer_name": customer.name,
            "reason": event.category.customer_description(),
            "attempt": attempt,
            "resolution_url": self.config.resolution_url(&issued.token),
            "expires_at": issued.expires_at,
        });
        self.notify_and_record(report, event.event_id, attempt, customer, templates::CUSTOMER_ACTION_REQUIRED, data)
            .await
    }

    async fn auto_reattempt(&self, report: &mut TaskReport, event: &NdrEvent, attempt: u32) -> Result<()> {
        let params = ReattemptParams {
            instructions: Some(format!("Automatic reattempt after {}", event.category)),
            ..ReattemptParams::default()
        };
        let result = self
            .collaborators
            .carrier
            .request_reattempt(&event.carrier_id, &event.shipment_reference, &params)
            .await;
        let now = self.clock.now();

        match result {
            Ok(ack) => {
                self.append(
                    report,
                    system_action(ActionType::ReattemptRequested, attempt, ActionOutcome::Success, now)
                        .with_metadata(json!({ "carrier_reference": ack.reference, "automatic": true })),
                )
                .await
            }
            Err(err) => {
                warn!(
                    event_id = %event.event_id,
                    attempt = attempt,
                    error = %err,
                    "Automatic reattempt request failed, counting as failed attempt"
                );
                report.note(ActionType::ReattemptRequested, ActionOutcome::Failed);
                self.count_command_failure(event, attempt, &err.to_string()).await
            }
        }
    }

    /// A carrier command that exhausted its retries counts like a failed delivery attempt
    async fn count_command_failure(&self, event: &NdrEvent, attempt: u32, error: &str) -> Result<()> {
        let policy = self.policies.policy_for_shipment(&event.shipment_reference).await;
        let threshold = self.engine.attempt_threshold;
        let now = self.clock.now();

        let outcome = self
            .mutator
            .mutate(event.event_id, |current| {
                current.push_action(
                    system_action(ActionType::ReattemptRequested, attempt, ActionOutcome::Failed, now)
                        .with_metadata(json!({ "error": error, "automatic": true })),
                );
                if !attempt_is_current(current, attempt) {
                    return Ok(Mutation::Write(None));
                }
                let recorded = record_new_attempt(
                    current,
                    Actor::System,
                    json!({ "source": "carrier_command", "error": error }),
                    threshold,
                    policy,
                    initiators::ORCHESTRATOR,
                    now,
                )?;
                Ok(Mutation::Write(Some(recorded)))
            })
            .await?;

        if let Some(recorded) = outcome.value {
            log_event_operation(
                operations::ATTEMPT_RECORDED,
                event.event_id,
                &event.shipment_reference,
                outcome.event.status.as_str(),
                Some("carrier command failure"),
            );
            if let Some(task) = recorded.follow_up(event.event_id) {
                self.queue.dispatch(task);
            }
        }
        Ok(())
    }

    async fn escalated(&self, report: TaskReport) -> Result<TaskReport> {
        let event = self.mutator.store().fetch(report.event_id).await?;
        if event.status != NdrStatus::Escalated {
            return Ok(report.skip(format!("event is {}", event.status)));
        }
        self.alert_seller_of_escalation(report, &event).await
    }

    async fn return_to_origin(&self, mut report: TaskReport) -> Result<TaskReport> {
        let event = self.mutator.store().fetch(report.event_id).await?;
        if event.status != NdrStatus::RtoTriggered {
            return Ok(report.skip(format!("event is {}", event.status)));
        }
        let attempt = event.attempt_number;

        if !event.has_succeeded_action_for_attempt(ActionType::ReturnRequested, attempt) {
            let result = self
                .collaborators
                .carrier
                .request_cancel(&event.carrier_id, &event.shipment_reference)
                .await;
            let now = self.clock.now();
            let action = match result {
                Ok(ack) => system_action(ActionType::ReturnRequested, attempt, ActionOutcome::Success, now)
                    .with_metadata(json!({ "carrier_reference": ack.reference })),
                Err(err) => {
                    log_error(
                        "resolution_orchestrator",
                        "return_to_origin",
                        &err.to_string(),
                        Some(&event.shipment_reference),
                    );
                    system_action(ActionType::ReturnRequested, attempt, ActionOutcome::Failed, now)
                        .with_metadata(json!({ "error": err.to_string() }))
                }
            };
            self.append(&mut report, action).await?;
        }

        self.alert_seller_of_escalation(report, &event).await
    }

    async fn alert_seller_of_escalation(&self, mut report: TaskReport, event: &NdrEvent) -> Result<TaskReport> {
        let attempt = event.attempt_number;
        if has_notification(event, templates::SELLER_ESCALATION_ALERT, attempt) {
            return Ok(report);
        }
        let shipment = self.lookup_shipment(&mut report, event, attempt).await?;
        let Some(info) = shipment else {
            return Ok(report);
        };

        let reason = event.escalations.last().map(|record| record.reason.clone());
        let data = json!({
            "shipment_reference": event.shipment_reference,
            "order_id": info.order_id,
            "status": event.status,
            "reason": reason,
            "attempt": attempt,
            "category": event.category,
        });
        self.notify_and_record(
            &mut report,
            event.event_id,
            attempt,
            &info.seller,
            templates::SELLER_ESCALATION_ALERT,
            data,
        )
        .await?;
        Ok(report)
    }

    /// Notify once with a bounded wait, then append the outcome
    async fn notify_and_record(
        &self,
        report: &mut TaskReport,
        event_id: Uuid,
        attempt: u32,
        contact: &Contact,
        template: &str,
        data: Value,
    ) -> Result<()> {
        let action_type = if template == templates::CUSTOMER_ACTION_REQUIRED {
            ActionType::CustomerNotified
        } else {
            ActionType::SellerNotified
        };

        let sent = tokio::time::timeout(
            self.config.collaborator_timeout(),
            self.collaborators.notifier.notify(contact, template, &data),
        )
        .await;
        let error = match sent {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("notifier timed out after {}ms", self.config.collaborator_timeout_ms)),
        };

        let now = self.clock.now();
        let action = match &error {
            None => system_action(action_type, attempt, ActionOutcome::Success, now)
                .with_metadata(json!({ "template": template })),
            Some(error) => {
                warn!(event_id = %event_id, template = template, error = %error, "Notification failed");
                system_action(action_type, attempt, ActionOutcome::Failed, now)
                    .with_metadata(json!({ "template": template, "error": error }))
            }
        };
        self.append(report, action).await
    }

    /// Append an audit action. Terminal events accept audit entries, never status changes.
    async fn append(&self, report: &mut TaskReport, action: ResolutionAction) -> Result<()> {
        let (action_type, result) = (action.action_type, action.result);
        self.mutator
            .mutate(report.event_id, |event| {
                event.push_action(action.clone());
                Ok(Mutation::Write(()))
            })
            .await?;
        report.note(action_type, result);
        Ok(())
    }
}

fn system_action(
    action_type: ActionType,
    attempt: u32,
    result: ActionOutcome,
    now: chrono::DateTime<chrono::Utc>,
) -> ResolutionAction {
    ResolutionAction::new(action_type, attempt, Actor::System, result, now)
}

/// The task still concerns the event's live attempt
fn attempt_is_current(event: &NdrEvent, attempt: u32) -> bool {
    !event.is_terminal() && event.status != NdrStatus::Escalated && event.attempt_number == attempt
}

fn has_notification(event: &NdrEvent, template: &str, attempt: u32) -> bool {
    event.resolution_actions.iter().any(|action| {
        action.attempt == attempt
            && action.succeeded()
            && action.metadata.get("template").and_then(Value::as_str) == Some(template)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ndr_signal, shipment_info, TestEngine};

    #[tokio::test]
    async fn test_customer_unavailable_gets_token_notification_and_reattempt() {
        let mut engine = TestEngine::new();
        engine.orders.insert(shipment_info("S1", "seller-1", false));

        let created = engine
            .ingest(ndr_signal("X", "S1", "CNA", "customer not available", Some(1)))
            .await;
        let reports = engine.drain().await;

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert!(report.completed.contains(&ActionType::ResolutionStarted));
        assert!(report.completed.contains(&ActionType::TokenIssued));
        assert!(report.completed.contains(&ActionType::CustomerNotified));
        assert!(report.completed.contains(&ActionType::SellerNotified));
        assert!(report.completed.contains(&ActionType::ReattemptRequested));

        let event = engine.event(created).await;
        assert_eq!(event.status, NdrStatus::InResolution);
        assert_eq!(engine.carrier.calls_for("S1").len(), 1);

        let sent = engine.notifier.sent_with_template(templates::CUSTOMER_ACTION_REQUIRED);
        assert_eq!(sent.len(), 1);
        let url = sent[0].data["resolution_url"].as_str().unwrap();
        assert!(url.starts_with("http://localhost:8080/v1/resolve/"));
    }

    #[tokio::test]
    async fn test_address_issue_waits_for_customer() {
        let mut engine = TestEngine::new();
        engine.orders.insert(shipment_info("S1", "seller-1", false));

        let created = engine
            .ingest(ndr_signal("X", "S1", "NDR", "incomplete address", Some(1)))
            .await;
        engine.drain().await;

        let event = engine.event(created).await;
        assert_eq!(event.status, NdrStatus::CustomerActionRequired);
        assert!(engine.carrier.calls().is_empty());
    }

    #[tokio::test]
    async fn test_replayed_task_does_not_repeat_side_effects() {
        let mut engine = TestEngine::new();
        engine.orders.insert(shipment_info("S1", "seller-1", false));

        let created = engine
            .ingest(ndr_signal("X", "S1", "CNA", "door locked", Some(1)))
            .await;
        engine.drain().await;

        let replay = engine
            .orchestrator
            .process(ResolutionTask::start_attempt(created, 1))
            .await
            .unwrap();

        assert!(replay.completed.is_empty());
        assert_eq!(engine.notifier.sent().len(), 2);
        assert_eq!(engine.carrier.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_notification_is_recorded_not_fatal() {
        let mut engine = TestEngine::new();
        engine.orders.insert(shipment_info("S1", "seller-1", false));
        engine.notifier.fail_next(1);

        let created = engine
            .ingest(ndr_signal("X", "S1", "REFUSED", "refused", Some(1)))
            .await;
        let reports = engine.drain().await;

        assert_eq!(reports[0].failed, vec![ActionType::CustomerNotified]);
        let event = engine.event(created).await;
        assert_eq!(event.status, NdrStatus::InResolution);
    }

    #[tokio::test]
    async fn test_missing_shipment_records_failed_lookup() {
        let mut engine = TestEngine::new();

        let created = engine
            .ingest(ndr_signal("X", "S9", "REFUSED", "refused", Some(1)))
            .await;
        engine.drain().await;

        let event = engine.event(created).await;
        let lookup = event.actions_of(ActionType::ShipmentLookup).next().unwrap();
        assert_eq!(lookup.result, ActionOutcome::Failed);
        assert_eq!(
            event.actions_of(ActionType::CustomerNotified).next().unwrap().result,
            ActionOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_exhausted_auto_reattempt_counts_as_failed_attempt() {
        let mut engine = TestEngine::new();
        engine.orders.insert(shipment_info("S1", "seller-1", false));
        engine.carrier.reject_all(true);

        let created = engine
            .ingest(ndr_signal("X", "S1", "CNA", "door locked", Some(1)))
            .await;
        engine.drain().await;

        let event = engine.event(created).await;
        // Each failed command opened a new attempt until the threshold escalated the event
        assert_eq!(event.attempt_number, 3);
        assert_eq!(event.status, NdrStatus::Escalated);
        assert_eq!(event.escalations.len(), 1);
        assert_eq!(
            engine
                .notifier
                .sent_with_template(templates::SELLER_ESCALATION_ALERT)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_noticed_while_every_worker_is_busy() {
        use crate::bootstrap::{ExternalServices, NdrCore};
        use crate::normalizer::RuleRegistry;
        use crate::services::ManualClock;
        use crate::store::InMemoryEventStore;
        use crate::test_helpers::{
            test_config, test_epoch, RecordingCarrier, RecordingNotifier, RecordingOrderCommands,
            StaticOrderBook,
        };
        use std::time::Duration;

        let mut config = test_config();
        config.orchestrator.max_concurrency = 1;
        config.orchestrator.shutdown_timeout_seconds = 0;
        config.carrier_commands.max_attempts = 1;
        config.carrier_commands.timeout_ms = 30_000;

        let carrier = Arc::new(RecordingCarrier::new());
        carrier.set_delay(Some(Duration::from_secs(30)));
        let orders = Arc::new(StaticOrderBook::new());
        orders.insert(shipment_info("S1", "seller-1", false));
        orders.insert(shipment_info("S2", "seller-1", false));
        let services = ExternalServices {
            carrier: carrier.clone(),
            notifier: Arc::new(RecordingNotifier::new()),
            orders,
            order_commands: Arc::new(RecordingOrderCommands::new()),
        };
        let (core, receiver) = NdrCore::new(
            config,
            RuleRegistry::builtin(),
            Arc::new(InMemoryEventStore::new()),
            services,
            Arc::new(ManualClock::new(test_epoch())),
        )
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Arc::clone(&core.orchestrator).start(receiver, shutdown_rx);
        for shipment in ["S1", "S2"] {
            core.ingestor
                .ingest(ndr_signal("X", shipment, "CNA", "customer not available", Some(1)))
                .await
                .unwrap();
        }

        // The single worker is stuck in the S1 reattempt call
        for _ in 0..200 {
            if !carrier.calls_for("S1").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(carrier.calls_for("S1").len(), 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker stops without waiting for the busy slot")
            .unwrap();
        assert!(carrier.calls_for("S2").is_empty());
    }
}
