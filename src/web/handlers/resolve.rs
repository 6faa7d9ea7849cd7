//! # Customer Resolution Handlers
//!
//! The token in the path is the only credential. An expired link, a forged
//! link and an already-resolved delivery each produce a different response so
//! the page can tell the customer what happened.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

use crate::models::EventSummary;
use crate::resolution::{ActionResponse, CustomerAction};
use crate::web::errors::ApiResult;
use crate::web::state::AppState;

/// Customer view of the event: GET /v1/resolve/:token
///
/// A concluded event returns its outcome with `concluded = true`.
pub async fn view_event(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<EventSummary>> {
    let summary = state.core.customer.view(&token).await?;
    Ok(Json(summary))
}

/// Customer action: POST /v1/resolve/:token
pub async fn submit_action(
    State(state): State<AppState>,
    Path(token): Path<String>,
    payload: Result<Json<CustomerAction>, JsonRejection>,
) -> ApiResult<Json<ActionResponse>> {
    let Json(action) = payload?;
    let response = state.core.customer.submit(&token, action).await?;
    info!(
        success = response.success,
        next_step = response.next_step.as_deref().unwrap_or("none"),
        "Customer action handled"
    );
    Ok(Json(response))
}
