// src/routes/health.rs
//! Service health endpoint.
//!
//! Answers without touching the store so orchestrators can poll it cheaply.
//! Reports the configured loop timing and the number of armed timers, which
//! is enough to tell whether background work is scheduled.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    simulation_interval_secs: u64,
    staleness_threshold_secs: u64,
    pending_jobs: usize,
}

/// Handle `GET /health`.
async fn health(State(monitor): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        simulation_interval_secs: monitor.timing.simulation_interval.as_secs(),
        staleness_threshold_secs: monitor.timing.staleness_threshold.as_secs(),
        pending_jobs: monitor.queue.pending_count(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
