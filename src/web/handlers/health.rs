//! # Health Check Handlers
//!
//! Liveness and readiness probes for load balancers and orchestrators.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error};

use crate::web::state::AppState;

/// Basic health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
}

/// Readiness response with per-dependency checks
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    status: String,
    timestamp: String,
    checks: BTreeMap<String, HealthCheck>,
    info: HealthInfo,
}

/// Individual health check result
#[derive(Debug, Serialize)]
pub struct HealthCheck {
    status: String,
    message: Option<String>,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthInfo {
    version: String,
    environment: String,
    open_circuits: Vec<String>,
    circuit_health_score: f64,
}

/// Basic health check endpoint: GET /health
///
/// Answers as long as the process serves requests.
pub async fn basic_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness probe: GET /ready
///
/// Not ready when the event store is unreachable. Open carrier circuits
/// degrade the report without failing it; signals are still accepted.
pub async fn readiness_probe(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    debug!("Performing readiness probe");

    let mut checks = BTreeMap::new();
    let store_check = check_store_health(&state).await;
    let ready = store_check.status == "healthy";
    checks.insert("event_store".to_string(), store_check);

    let open_circuits = state.core.breakers.open_carriers();
    checks.insert(
        "carrier_circuits".to_string(),
        HealthCheck {
            status: if open_circuits.is_empty() { "healthy" } else { "degraded" }.to_string(),
            message: (!open_circuits.is_empty())
                .then(|| format!("Open circuits: {}", open_circuits.join(", "))),
            duration_ms: 0,
        },
    );

    let response = ReadinessResponse {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
        info: HealthInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: state.environment.clone(),
            open_circuits,
            circuit_health_score: state.core.breakers.health_score(),
        },
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

async fn check_store_health(state: &AppState) -> HealthCheck {
    let start = Instant::now();
    let result = state.core.store.health_check().await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => HealthCheck {
            status: "healthy".to_string(),
            message: None,
            duration_ms,
        },
        Err(e) => {
            error!(error = %e, "Event store health check failed");
            HealthCheck {
                status: "unhealthy".to_string(),
                message: Some("Event store unreachable".to_string()),
                duration_ms,
            }
        }
    }
}
