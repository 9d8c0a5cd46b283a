//! Device registry endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::devices::{DeviceHealth, Removal, StatusChange, StatusUpdate};
use crate::error::Result;
use crate::models::{Device, DeviceId, NewDevice};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/devices", get(list).post(register))
        .route("/devices/health", get(health))
        .route("/devices/samples", post(create_samples))
        .route("/devices/{id}", get(fetch).put(update).delete(remove))
        .route("/devices/{id}/status", patch(update_status))
}

async fn list(State(monitor): State<AppState>) -> Result<Json<Vec<Device>>> {
    Ok(Json(monitor.devices.list().await?))
}

async fn register(
    State(monitor): State<AppState>,
    Json(new): Json<NewDevice>,
) -> Result<(StatusCode, Json<Device>)> {
    // ---
    info!("POST /devices - {}", new.name);
    let device = monitor.devices.register(new).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

async fn fetch(State(monitor): State<AppState>, Path(id): Path<DeviceId>) -> Result<Json<Device>> {
    Ok(Json(monitor.devices.get(id).await?))
}

async fn update(
    State(monitor): State<AppState>,
    Path(id): Path<DeviceId>,
    Json(new): Json<NewDevice>,
) -> Result<Json<Device>> {
    // ---
    info!("PUT /devices/{} - {}", id, new.name);
    Ok(Json(monitor.devices.update(id, new).await?))
}

async fn update_status(
    State(monitor): State<AppState>,
    Path(id): Path<DeviceId>,
    Json(change): Json<StatusChange>,
) -> Result<Json<StatusUpdate>> {
    // ---
    info!("PATCH /devices/{}/status - {}", id, change.status);
    Ok(Json(monitor.devices.update_status(id, change).await?))
}

async fn remove(State(monitor): State<AppState>, Path(id): Path<DeviceId>) -> Result<Json<Removal>> {
    // ---
    info!("DELETE /devices/{}", id);
    // Best effort; the chain also stops on its own once the device is gone
    monitor
        .queue
        .cancel(&crate::scheduler::Job::GenerationTick(id));
    Ok(Json(monitor.devices.delete(id).await?))
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    id: Option<DeviceId>,
}

async fn health(
    State(monitor): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> Result<Json<Vec<DeviceHealth>>> {
    Ok(Json(monitor.devices.health(query.id).await?))
}

async fn create_samples(State(monitor): State<AppState>) -> Result<(StatusCode, Json<Vec<Device>>)> {
    // ---
    info!("POST /devices/samples");
    let devices = monitor.devices.create_samples().await?;
    Ok((StatusCode::CREATED, Json(devices)))
}
