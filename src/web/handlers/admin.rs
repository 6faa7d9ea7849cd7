//! # Admin Override Handlers
//!
//! Operator endpoints. Every override is recorded on the event's audit trail
//! with the operator as actor.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NdrError;
use crate::models::NdrEvent;
use crate::state_machine::NdrStatus;
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRequest {
    pub reason: String,
    pub actor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualResolutionRequest {
    pub note: String,
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideResponse {
    pub event_id: Uuid,
    pub status: NdrStatus,
    pub attempt_number: u32,
}

impl From<NdrEvent> for OverrideResponse {
    fn from(event: NdrEvent) -> Self {
        Self {
            event_id: event.event_id,
            status: event.status,
            attempt_number: event.attempt_number,
        }
    }
}

fn parse_event_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::invalid_uuid(raw))
}

fn require(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Full event with audit trail: GET /v1/admin/events/:event_id
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<NdrEvent>> {
    let event_id = parse_event_id(&event_id)?;
    let event = state
        .core
        .store
        .get(event_id)
        .await
        .map_err(NdrError::from)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(event))
}

/// Operator escalation: POST /v1/admin/events/:event_id/escalate
pub async fn escalate_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    payload: Result<Json<OverrideRequest>, JsonRejection>,
) -> ApiResult<Json<OverrideResponse>> {
    let event_id = parse_event_id(&event_id)?;
    let Json(request) = payload?;
    require("reason", &request.reason)?;
    require("actor", &request.actor)?;

    let event = state
        .core
        .admin
        .escalate(event_id, &request.reason, &request.actor)
        .await?;
    Ok(Json(event.into()))
}

/// Return an escalated shipment to origin: POST /v1/admin/events/:event_id/rto
pub async fn trigger_rto(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    payload: Result<Json<OverrideRequest>, JsonRejection>,
) -> ApiResult<Json<OverrideResponse>> {
    let event_id = parse_event_id(&event_id)?;
    let Json(request) = payload?;
    require("reason", &request.reason)?;
    require("actor", &request.actor)?;

    let event = state
        .core
        .admin
        .trigger_rto(event_id, &request.reason, &request.actor)
        .await?;
    Ok(Json(event.into()))
}

/// Close an escalated event out of band: POST /v1/admin/events/:event_id/resolve
pub async fn resolve_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    payload: Result<Json<ManualResolutionRequest>, JsonRejection>,
) -> ApiResult<Json<OverrideResponse>> {
    let event_id = parse_event_id(&event_id)?;
    let Json(request) = payload?;
    require("note", &request.note)?;
    require("actor", &request.actor)?;

    let event = state
        .core
        .admin
        .resolve_manually(event_id, &request.note, &request.actor)
        .await?;
    Ok(Json(event.into()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, get, post_json, send};
    use crate::test_helpers::{ndr_signal, TestEngine};
    use axum::http::StatusCode;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_escalate_then_rto() {
        let engine = TestEngine::new();
        let event_id = engine
            .ingest(ndr_signal("X", "S1", "NDR", "customer not available", Some(1)))
            .await;

        let (status, body) = send(
            app(&engine),
            post_json(
                &format!("/v1/admin/events/{event_id}/escalate"),
                json!({"reason": "seller request", "actor": "ops-7"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "escalated");

        let (status, body) = send(
            app(&engine),
            post_json(
                &format!("/v1/admin/events/{event_id}/rto"),
                json!({"reason": "seller chose return", "actor": "ops-7"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "rto_triggered");

        let (status, body) = send(app(&engine), get(&format!("/v1/admin/events/{event_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        let escalations = body["escalations"].as_array().cloned().unwrap_or_default();
        assert_eq!(escalations.len(), 2);
    }

    #[tokio::test]
    async fn test_override_on_terminal_event_conflicts() {
        let engine = TestEngine::new();
        let event_id = engine
            .ingest(ndr_signal("X", "S1", "NDR", "customer not available", Some(1)))
            .await;
        engine.admin.escalate(event_id, "seller request", "ops").await.unwrap();
        engine.admin.resolve_manually(event_id, "delivered", "ops").await.unwrap();

        let (status, body) = send(
            app(&engine),
            post_json(
                &format!("/v1/admin/events/{event_id}/escalate"),
                json!({"reason": "late", "actor": "ops"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "EVENT_ALREADY_TERMINAL");
    }

    #[tokio::test]
    async fn test_bad_ids_and_bodies() {
        let engine = TestEngine::new();

        let (status, body) = send(app(&engine), get("/v1/admin/events/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_UUID");

        let (status, _) = send(app(&engine), get(&format!("/v1/admin/events/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            app(&engine),
            post_json(
                &format!("/v1/admin/events/{}/escalate", Uuid::new_v4()),
                json!({"reason": " ", "actor": "ops"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
