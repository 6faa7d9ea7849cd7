//! PostgreSQL event store.
//!
//! One row per event. The audit trail and escalation records live in JSONB
//! columns and are rewritten with the row on every compare-and-set. The
//! partial unique index `ndr_events_one_active_per_shipment` enforces at most
//! one non-terminal event per shipment.

use super::{CreateOutcome, EventStore, StoreError, StoreResult};
use crate::models::{EscalationRecord, NdrCategory, NdrEvent, ResolutionAction};
use crate::state_machine::NdrStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    event_id, shipment_reference, carrier_id, carrier_event_key, category, confidence,
    raw_reason, needs_manual_review, status, attempt_number, detected_at,
    resolution_deadline, resolved_at, resolution_actions, escalations, version, updated_at
"#;

/// Status filter matching the partial unique index predicate
const ACTIVE_PREDICATE: &str = "status NOT IN ('resolved', 'rto_triggered')";

/// Attempts to find-or-create before giving up when the active row keeps changing under us
const CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_one_where(&self, predicate: &str, bind: &str) -> StoreResult<Option<NdrEvent>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM ndr_events WHERE {predicate} ORDER BY detected_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql).bind(bind).fetch_optional(&self.pool).await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn current_version(&self, event_id: Uuid) -> StoreResult<Option<i64>> {
        let row = sqlx::query("SELECT version FROM ndr_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("version")))
    }
}

fn event_from_row(row: &PgRow) -> StoreResult<NdrEvent> {
    let category: String = row.try_get("category")?;
    let status: String = row.try_get("status")?;
    let confidence: i16 = row.try_get("confidence")?;
    let attempt_number: i32 = row.try_get("attempt_number")?;
    let Json(resolution_actions): Json<Vec<ResolutionAction>> = row.try_get("resolution_actions")?;
    let Json(escalations): Json<Vec<EscalationRecord>> = row.try_get("escalations")?;

    Ok(NdrEvent {
        event_id: row.try_get("event_id")?,
        shipment_reference: row.try_get("shipment_reference")?,
        carrier_id: row.try_get("carrier_id")?,
        carrier_event_key: row.try_get("carrier_event_key")?,
        category: category
            .parse::<NdrCategory>()
            .map_err(StoreError::Serialization)?,
        confidence: u8::try_from(confidence)
            .map_err(|_| StoreError::Serialization(format!("confidence out of range: {confidence}")))?,
        raw_reason: row.try_get("raw_reason")?,
        needs_manual_review: row.try_get("needs_manual_review")?,
        status: status.parse::<NdrStatus>().map_err(StoreError::Serialization)?,
        attempt_number: u32::try_from(attempt_number).map_err(|_| {
            StoreError::Serialization(format!("attempt_number out of range: {attempt_number}"))
        })?,
        detected_at: row.try_get("detected_at")?,
        resolution_deadline: row.try_get("resolution_deadline")?,
        resolved_at: row.try_get("resolved_at")?,
        resolution_actions,
        escalations,
        version: row.try_get("version")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn attempt_param(attempt: u32) -> StoreResult<i32> {
    i32::try_from(attempt)
        .map_err(|_| StoreError::Serialization(format!("attempt_number out of range: {attempt}")))
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn create_if_absent(&self, candidate: NdrEvent) -> StoreResult<CreateOutcome> {
        for _ in 0..CREATE_ATTEMPTS {
            let sql = format!(
                r#"
                INSERT INTO ndr_events (
                    event_id, shipment_reference, carrier_id, carrier_event_key, category,
                    confidence, raw_reason, needs_manual_review, status, attempt_number,
                    detected_at, resolution_deadline, resolved_at, resolution_actions,
                    escalations, version, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (shipment_reference) WHERE {ACTIVE_PREDICATE} DO NOTHING
                RETURNING event_id
                "#
            );
            let inserted = sqlx::query(&sql)
                .bind(candidate.event_id)
                .bind(&candidate.shipment_reference)
                .bind(&candidate.carrier_id)
                .bind(&candidate.carrier_event_key)
                .bind(candidate.category.as_str())
                .bind(i16::from(candidate.confidence))
                .bind(&candidate.raw_reason)
                .bind(candidate.needs_manual_review)
                .bind(candidate.status.as_str())
                .bind(attempt_param(candidate.attempt_number)?)
                .bind(candidate.detected_at)
                .bind(candidate.resolution_deadline)
                .bind(candidate.resolved_at)
                .bind(Json(&candidate.resolution_actions))
                .bind(Json(&candidate.escalations))
                .bind(candidate.version)
                .bind(candidate.updated_at)
                .fetch_optional(&self.pool)
                .await?;

            if inserted.is_some() {
                return Ok(CreateOutcome::Created(candidate));
            }

            // Conflict: read the active row. It may have gone terminal in between.
            if let Some(existing) = self
                .active_for_shipment(&candidate.shipment_reference)
                .await?
            {
                return Ok(CreateOutcome::Existing(existing));
            }
            debug!(
                shipment_reference = %candidate.shipment_reference,
                "Active event vanished during find-or-create, retrying insert"
            );
        }

        warn!(
            shipment_reference = %candidate.shipment_reference,
            "Find-or-create did not settle"
        );
        Err(StoreError::Internal(format!(
            "find-or-create for shipment {} did not settle",
            candidate.shipment_reference
        )))
    }

    async fn get(&self, event_id: Uuid) -> StoreResult<Option<NdrEvent>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM ndr_events WHERE event_id = $1");
        let row = sqlx::query(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn active_for_shipment(&self, shipment_reference: &str) -> StoreResult<Option<NdrEvent>> {
        self.fetch_one_where(
            &format!("shipment_reference = $1 AND {ACTIVE_PREDICATE}"),
            shipment_reference,
        )
        .await
    }

    async fn latest_for_shipment(&self, shipment_reference: &str) -> StoreResult<Option<NdrEvent>> {
        self.fetch_one_where("shipment_reference = $1", shipment_reference)
            .await
    }

    async fn compare_and_set(&self, event: NdrEvent) -> StoreResult<NdrEvent> {
        let updated = sqlx::query(
            r#"
            UPDATE ndr_events SET
                category = $3,
                confidence = $4,
                needs_manual_review = $5,
                status = $6,
                attempt_number = $7,
                resolved_at = $8,
                resolution_actions = $9,
                escalations = $10,
                updated_at = $11,
                version = version + 1
            WHERE event_id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(event.event_id)
        .bind(event.version)
        .bind(event.category.as_str())
        .bind(i16::from(event.confidence))
        .bind(event.needs_manual_review)
        .bind(event.status.as_str())
        .bind(attempt_param(event.attempt_number)?)
        .bind(event.resolved_at)
        .bind(Json(&event.resolution_actions))
        .bind(Json(&event.escalations))
        .bind(event.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(row) => {
                let mut stored = event;
                stored.version = row.try_get("version")?;
                Ok(stored)
            }
            None => match self.current_version(event.event_id).await? {
                Some(actual) => Err(StoreError::StaleWrite {
                    event_id: event.event_id,
                    expected: event.version,
                    actual,
                }),
                None => Err(StoreError::NotFound(event.event_id)),
            },
        }
    }

    async fn sweep_candidates(
        &self,
        now: DateTime<Utc>,
        attempt_threshold: u32,
        limit: usize,
    ) -> StoreResult<Vec<NdrEvent>> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM ndr_events
            WHERE {ACTIVE_PREDICATE}
              AND (attempt_number >= $1 OR resolution_deadline < $2)
            ORDER BY (status = 'escalated') ASC, resolution_deadline ASC
            LIMIT $3
            "#
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&sql)
            .bind(attempt_param(attempt_threshold)?)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        let row = sqlx::query("SELECT 1 as health").fetch_one(&self.pool).await?;
        let health: i32 = row.try_get("health")?;
        if health == 1 {
            Ok(())
        } else {
            Err(StoreError::Internal("unexpected health probe result".to_string()))
        }
    }
}
