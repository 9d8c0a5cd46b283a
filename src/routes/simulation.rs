//! Simulation control, backfill and the manual liveness scan.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::error::Result;
use crate::liveness::ScanReport;
use crate::models::{Device, DeviceId};
use crate::simulation::{BackfillReport, SimulationStatus};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/devices/{id}/simulation/start", post(start))
        .route("/devices/{id}/simulation/stop", post(stop))
        .route("/devices/{id}/history", post(backfill))
        .route("/simulation/devices", get(simulating))
        .route("/liveness/scan", post(scan))
}

async fn start(
    State(monitor): State<AppState>,
    Path(id): Path<DeviceId>,
) -> Result<Json<SimulationStatus>> {
    info!("POST /devices/{}/simulation/start", id);
    Ok(Json(monitor.simulation.start(id).await?))
}

async fn stop(
    State(monitor): State<AppState>,
    Path(id): Path<DeviceId>,
) -> Result<Json<SimulationStatus>> {
    info!("POST /devices/{}/simulation/stop", id);
    Ok(Json(monitor.simulation.stop(id).await?))
}

async fn simulating(State(monitor): State<AppState>) -> Result<Json<Vec<Device>>> {
    Ok(Json(monitor.simulation.list_simulating().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackfillRequest {
    days: u32,
    points_per_day: u32,
    #[serde(default)]
    start: Option<DateTime<Utc>>,
}

async fn backfill(
    State(monitor): State<AppState>,
    Path(id): Path<DeviceId>,
    Json(request): Json<BackfillRequest>,
) -> Result<(StatusCode, Json<BackfillReport>)> {
    // ---
    info!(
        "POST /devices/{}/history - {} days x {} points",
        id, request.days, request.points_per_day
    );
    let report = monitor
        .simulation
        .backfill(id, request.days, request.points_per_day, request.start)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// One scan outside the recurring schedule; does not re-arm anything.
async fn scan(State(monitor): State<AppState>) -> Result<Json<ScanReport>> {
    info!("POST /liveness/scan");
    Ok(Json(monitor.liveness.scan().await?))
}
