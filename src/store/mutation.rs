//! Read-modify-write against the event store with optimistic concurrency.
//!
//! A losing writer re-reads and re-applies its change instead of overwriting.
//! The change closure must be a pure function of the event it is handed, since
//! it runs again on every retry.

use super::{EventStore, StoreError};
use crate::error::{NdrError, Result};
use crate::models::NdrEvent;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// What a change closure decided
#[derive(Debug)]
pub enum Mutation<T> {
    /// Persist the modified event
    Write(T),
    /// Nothing to persist; the event is left untouched
    Skip(T),
}

#[derive(Debug)]
pub struct MutationOutcome<T> {
    /// The stored event after the write, or the event as read when skipped
    pub event: NdrEvent,
    pub value: T,
    pub written: bool,
    /// Stale writes lost before this outcome
    pub conflicts: u32,
}

#[derive(Debug, Clone)]
pub struct EventMutator {
    store: Arc<dyn EventStore>,
    max_retries: u32,
}

impl EventMutator {
    pub fn new(store: Arc<dyn EventStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    /// Same store, different retry budget
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Apply `change` to the current version of an event, retrying on stale writes
    pub async fn mutate<T, F>(&self, event_id: Uuid, change: F) -> Result<MutationOutcome<T>>
    where
        F: FnMut(&mut NdrEvent) -> Result<Mutation<T>>,
    {
        let current = self.store.fetch(event_id).await?;
        self.mutate_from(current, change).await
    }

    /// Like [`EventMutator::mutate`] but starts from an already-read event
    pub async fn mutate_from<T, F>(&self, mut current: NdrEvent, mut change: F) -> Result<MutationOutcome<T>>
    where
        F: FnMut(&mut NdrEvent) -> Result<Mutation<T>>,
    {
        let mut conflicts = 0;
        loop {
            let mut next = current.clone();
            let value = match change(&mut next)? {
                Mutation::Skip(value) => {
                    return Ok(MutationOutcome {
                        event: current,
                        value,
                        written: false,
                        conflicts,
                    })
                }
                Mutation::Write(value) => value,
            };

            match self.store.compare_and_set(next).await {
                Ok(stored) => {
                    return Ok(MutationOutcome {
                        event: stored,
                        value,
                        written: true,
                        conflicts,
                    })
                }
                Err(err @ StoreError::StaleWrite { .. }) if conflicts < self.max_retries => {
                    conflicts += 1;
                    debug!(
                        event_id = %current.event_id,
                        conflicts = conflicts,
                        error = %err,
                        "Lost compare-and-set, re-reading event"
                    );
                    current = self.store.fetch(current.event_id).await?;
                }
                Err(err) => return Err(NdrError::from(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CarrierSignal, ClassificationSource, NdrCategory, NormalizedSignal, SignalKind,
    };
    use crate::state_machine::NdrStatus;
    use crate::store::{CreateOutcome, InMemoryEventStore};
    use chrono::{Duration, Utc};

    async fn seeded() -> (Arc<InMemoryEventStore>, NdrEvent) {
        let store = Arc::new(InMemoryEventStore::new());
        let now = Utc::now();
        let signal = CarrierSignal {
            carrier_id: "X".to_string(),
            shipment_reference: "S1".to_string(),
            status_code: "NDR".to_string(),
            remarks: "door locked".to_string(),
            attempt_number: Some(1),
            timestamp: now,
            carrier_event_key: None,
        };
        let normalized = NormalizedSignal {
            kind: SignalKind::NonDelivery,
            category: NdrCategory::CustomerUnavailable,
            confidence: 75,
            source: ClassificationSource::Keyword,
            ambiguous: false,
        };
        let event = NdrEvent::detect(&signal, &normalized, "k1", now, Duration::hours(48));
        let CreateOutcome::Created(event) = store.create_if_absent(event).await.unwrap() else {
            panic!("expected a new event");
        };
        (store, event)
    }

    #[tokio::test]
    async fn test_retries_after_stale_write() {
        let (store, stale) = seeded().await;
        let mutator = EventMutator::new(store.clone(), 3);

        // Another writer moves the event on before our write lands
        let mut other = stale.clone();
        other.attempt_number = 2;
        store.compare_and_set(other).await.unwrap();

        let outcome = mutator
            .mutate_from(stale, |event| {
                event.status = NdrStatus::InResolution;
                Ok(Mutation::Write(event.attempt_number))
            })
            .await
            .unwrap();

        assert!(outcome.written);
        assert_eq!(outcome.conflicts, 1);
        // The change was re-applied on top of the concurrent write
        assert_eq!(outcome.value, 2);
        assert_eq!(outcome.event.version, 3);
        assert_eq!(outcome.event.status, NdrStatus::InResolution);
    }

    #[tokio::test]
    async fn test_zero_retries_surfaces_conflict() {
        let (store, stale) = seeded().await;
        let mutator = EventMutator::new(store.clone(), 0);

        store.compare_and_set(stale.clone()).await.unwrap();

        let err = mutator
            .mutate_from(stale, |_| Ok(Mutation::Write(())))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_skip_does_not_write() {
        let (store, event) = seeded().await;
        let mutator = EventMutator::new(store.clone(), 3);

        let outcome = mutator
            .mutate(event.event_id, |_| Ok(Mutation::Skip("duplicate")))
            .await
            .unwrap();

        assert!(!outcome.written);
        assert_eq!(outcome.event.version, 1);
        assert_eq!(store.fetch(event.event_id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_change_error_aborts() {
        let (store, event) = seeded().await;
        let mutator = EventMutator::new(store, 3);

        let err = mutator
            .mutate(event.event_id, |_| -> Result<Mutation<()>> {
                Err(NdrError::validation("nope"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "validation_error");
    }
}
