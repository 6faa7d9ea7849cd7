//! # Event Store
//!
//! The single authority for NDR event state. Every component that changes an
//! event goes through [`EventStore::compare_and_set`]: the writer hands back the
//! record it read (carrying the version it saw) and the write only lands if the
//! stored version still matches.
//!
//! [`EventStore::create_if_absent`] is the atomic find-or-create that keeps at
//! most one non-terminal event per shipment reference.

pub mod memory;
pub mod mutation;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryEventStore;
pub use mutation::{EventMutator, Mutation, MutationOutcome};
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;

use crate::models::NdrEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Stale write on event {event_id}: expected version {expected}, found {actual}")]
    StaleWrite {
        event_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Event not found: {0}")]
    NotFound(Uuid),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_stale_write(&self) -> bool {
        matches!(self, Self::StaleWrite { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an atomic find-or-create
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// The candidate was stored
    Created(NdrEvent),
    /// A non-terminal event already exists for the shipment; the candidate was discarded
    Existing(NdrEvent),
}

impl CreateOutcome {
    pub fn event(&self) -> &NdrEvent {
        match self {
            Self::Created(event) | Self::Existing(event) => event,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

#[async_trait]
pub trait EventStore: Send + Sync + std::fmt::Debug {
    /// Store `candidate` unless a non-terminal event exists for its shipment
    async fn create_if_absent(&self, candidate: NdrEvent) -> StoreResult<CreateOutcome>;

    async fn get(&self, event_id: Uuid) -> StoreResult<Option<NdrEvent>>;

    /// The non-terminal event for a shipment, if one exists
    async fn active_for_shipment(&self, shipment_reference: &str) -> StoreResult<Option<NdrEvent>>;

    /// Most recently detected event for a shipment, terminal or not
    async fn latest_for_shipment(&self, shipment_reference: &str) -> StoreResult<Option<NdrEvent>>;

    /// Persist `event` if the stored version still equals `event.version`.
    ///
    /// Returns the stored record with its version incremented.
    async fn compare_and_set(&self, event: NdrEvent) -> StoreResult<NdrEvent>;

    /// Non-terminal events that reached the attempt threshold or passed their deadline,
    /// oldest deadline first with `escalated` events after all others
    async fn sweep_candidates(
        &self,
        now: DateTime<Utc>,
        attempt_threshold: u32,
        limit: usize,
    ) -> StoreResult<Vec<NdrEvent>>;

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Like [`EventStore::get`] but a missing event is an error
    async fn fetch(&self, event_id: Uuid) -> StoreResult<NdrEvent> {
        self.get(event_id)
            .await?
            .ok_or(StoreError::NotFound(event_id))
    }
}
