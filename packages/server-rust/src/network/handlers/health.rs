//! Health, liveness, and readiness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Detailed health as JSON.
///
/// Always 200; the `state` field tells "up but draining" apart from
/// "ready".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();
    let open_transactions = state.uow.as_ref().map_or(0, |uow| uow.open_count());

    Json(json!({
        "state": health.as_str(),
        "instance_id": state.instance_id,
        "in_flight": state.shutdown.batches_in_flight(),
        "open_transactions": open_transactions,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness check: the process is up and answering.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness check: 200 only while `Ready`, 503 while starting, draining
/// or stopped.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
