//! # Web API Route Definitions

use crate::web::handlers;
use crate::web::state::AppState;
use axum::routing::{get, post};
use axum::Router;

/// API v1 routes, nested under `/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Carrier ingress
        .route("/signals", post(handlers::signals::ingest_signal))
        // Customer resolution link
        .route(
            "/resolve/:token",
            get(handlers::resolve::view_event).post(handlers::resolve::submit_action),
        )
        // Admin overrides
        .route("/admin/events/:event_id", get(handlers::admin::get_event))
        .route(
            "/admin/events/:event_id/escalate",
            post(handlers::admin::escalate_event),
        )
        .route(
            "/admin/events/:event_id/resolve",
            post(handlers::admin::resolve_event),
        )
        .route("/admin/events/:event_id/rto", post(handlers::admin::trigger_rto))
}

/// Health probes, unversioned
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::basic_health))
        .route("/ready", get(handlers::health::readiness_probe))
}
