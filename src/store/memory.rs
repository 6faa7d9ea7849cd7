//! In-process event store backed by `DashMap`.
//!
//! Used by tests and single-node deployments without a database. Find-or-create
//! holds the shard lock of the shipment's index entry for the whole check, which
//! gives the same atomicity the partial unique index gives in PostgreSQL.

use super::{CreateOutcome, EventStore, StoreError, StoreResult};
use crate::models::NdrEvent;
use crate::state_machine::NdrStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: DashMap<Uuid, NdrEvent>,
    /// shipment → non-terminal event
    active_by_shipment: DashMap<String, Uuid>,
    /// shipment → most recently created event
    latest_by_shipment: DashMap<String, Uuid>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every event ever stored for a shipment
    pub fn events_for_shipment(&self, shipment_reference: &str) -> Vec<NdrEvent> {
        let mut events: Vec<NdrEvent> = self
            .events
            .iter()
            .filter(|entry| entry.shipment_reference == shipment_reference)
            .map(|entry| entry.value().clone())
            .collect();
        events.sort_by_key(|event| event.detected_at);
        events
    }

    fn insert_new(&self, candidate: NdrEvent) -> NdrEvent {
        self.latest_by_shipment
            .insert(candidate.shipment_reference.clone(), candidate.event_id);
        self.events.insert(candidate.event_id, candidate.clone());
        candidate
    }

    fn cloned(&self, event_id: &Uuid) -> Option<NdrEvent> {
        self.events.get(event_id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create_if_absent(&self, candidate: NdrEvent) -> StoreResult<CreateOutcome> {
        match self
            .active_by_shipment
            .entry(candidate.shipment_reference.clone())
        {
            Entry::Occupied(mut entry) => {
                // The index may briefly point at an event a concurrent CAS just made terminal
                match self.cloned(entry.get()).filter(|existing| !existing.is_terminal()) {
                    Some(existing) => Ok(CreateOutcome::Existing(existing)),
                    None => {
                        entry.insert(candidate.event_id);
                        Ok(CreateOutcome::Created(self.insert_new(candidate)))
                    }
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(candidate.event_id);
                Ok(CreateOutcome::Created(self.insert_new(candidate)))
            }
        }
    }

    async fn get(&self, event_id: Uuid) -> StoreResult<Option<NdrEvent>> {
        Ok(self.cloned(&event_id))
    }

    async fn active_for_shipment(&self, shipment_reference: &str) -> StoreResult<Option<NdrEvent>> {
        let event_id = self
            .active_by_shipment
            .get(shipment_reference)
            .map(|entry| *entry.value());
        Ok(event_id
            .and_then(|id| self.cloned(&id))
            .filter(|event| !event.is_terminal()))
    }

    async fn latest_for_shipment(&self, shipment_reference: &str) -> StoreResult<Option<NdrEvent>> {
        let event_id = self
            .latest_by_shipment
            .get(shipment_reference)
            .map(|entry| *entry.value());
        Ok(event_id.and_then(|id| self.cloned(&id)))
    }

    async fn compare_and_set(&self, event: NdrEvent) -> StoreResult<NdrEvent> {
        let event_id = event.event_id;
        let stored = {
            let mut current = self
                .events
                .get_mut(&event_id)
                .ok_or(StoreError::NotFound(event_id))?;

            if current.version != event.version {
                return Err(StoreError::StaleWrite {
                    event_id,
                    expected: event.version,
                    actual: current.version,
                });
            }

            let mut next = event;
            next.version += 1;
            *current = next.clone();
            next
        };

        // Index maintenance happens after the event shard lock is released
        if stored.is_terminal() {
            self.active_by_shipment
                .remove_if(&stored.shipment_reference, |_, id| *id == event_id);
        }

        debug!(
            event_id = %event_id,
            version = stored.version,
            status = %stored.status,
            "Event written"
        );
        Ok(stored)
    }

    async fn sweep_candidates(
        &self,
        now: DateTime<Utc>,
        attempt_threshold: u32,
        limit: usize,
    ) -> StoreResult<Vec<NdrEvent>> {
        let mut candidates: Vec<NdrEvent> = self
            .events
            .iter()
            .filter(|entry| {
                !entry.is_terminal()
                    && (entry.attempts_exhausted(attempt_threshold) || entry.is_overdue(now))
            })
            .map(|entry| entry.value().clone())
            .collect();

        // Escalated events awaiting a seller decision must not crowd out fresh ones
        candidates.sort_by_key(|event| (event.status == NdrStatus::Escalated, event.resolution_deadline));
        candidates.truncate(limit);
        Ok(candidates)
    }
}
