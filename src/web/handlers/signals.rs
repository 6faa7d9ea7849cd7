//! # Carrier Signal Handler
//!
//! Acknowledges carrier callbacks. Only the compare-and-set write happens on
//! the request path; notifications and carrier commands run afterwards.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::debug;

use crate::models::CarrierSignal;
use crate::orchestration::IngestResponse;
use crate::web::errors::ApiResult;
use crate::web::state::AppState;

/// Ingest a carrier signal: POST /v1/signals
pub async fn ingest_signal(
    State(state): State<AppState>,
    payload: Result<Json<CarrierSignal>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let Json(signal) = payload?;
    debug!(
        carrier = %signal.carrier_id,
        shipment = %signal.shipment_reference,
        status_code = %signal.status_code,
        "Carrier signal received"
    );

    let response = state.core.ingestor.ingest(signal).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}
