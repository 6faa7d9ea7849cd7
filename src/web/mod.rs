//! # Web API
//!
//! HTTP surface of the engine: carrier signal ingestion, the customer
//! resolution link, admin overrides and health probes.
//!
//! ```text
//! POST /v1/signals                          carrier callback, always 202 when valid
//! GET  /v1/resolve/:token                   customer view of the event
//! POST /v1/resolve/:token                   customer action
//! GET  /v1/admin/events/:event_id           full event with audit trail
//! POST /v1/admin/events/:event_id/escalate  operator escalation
//! POST /v1/admin/events/:event_id/resolve   manual resolution of an escalated event
//! POST /v1/admin/events/:event_id/rto       return-to-origin of an escalated event
//! GET  /health, /ready                      probes
//! ```

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use errors::{ApiError, ApiResult};
pub use state::AppState;

use axum::Router;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Create the web application with all routes and middleware
pub fn create_app(app_state: AppState) -> Router {
    let request_timeout = Duration::from_millis(app_state.config.request_timeout_ms);

    let app = Router::new()
        .merge(routes::health_routes())
        .nest("/v1", routes::api_v1_routes())
        .with_state(app_state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::request_id::add_request_id));

    info!(
        timeout_ms = request_timeout.as_millis() as u64,
        "🌐 Web application created"
    );
    app
}
