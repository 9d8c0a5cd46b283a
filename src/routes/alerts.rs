//! Alert listing and lifecycle actions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::alerts::{AlertSummary, BatchUpdateResult, BulkResolution, NewAlert};
use crate::error::Result;
use crate::models::{Alert, AlertId, AlertStatus, DeviceId};
use crate::store::AlertFilter;

// ---

const DEFAULT_LIMIT: usize = 50;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/alerts", get(list).post(create))
        .route("/alerts/summary", get(summary))
        .route("/alerts/batch-status", post(batch_status))
        .route("/alerts/{id}/acknowledge", post(acknowledge))
        .route("/alerts/{id}/resolve", post(resolve))
        .route("/devices/{id}/alerts/resolve", post(resolve_for_device))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    /// Comma separated, e.g. `new,acknowledged`.
    status: Option<String>,
    device_id: Option<DeviceId>,
    limit: Option<usize>,
}

async fn list(
    State(monitor): State<AppState>,
    Query(params): Query<AlertsQuery>,
) -> Result<Json<Vec<Alert>>> {
    // ---
    let statuses = params
        .status
        .as_deref()
        .map(|s| {
            s.split(',')
                .filter(|part| !part.trim().is_empty())
                .map(|part| part.trim().parse::<AlertStatus>())
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let filter = AlertFilter {
        device_id: params.device_id,
        statuses,
        limit: Some(params.limit.unwrap_or(DEFAULT_LIMIT)),
    };
    Ok(Json(monitor.alerts.list(&filter).await?))
}

async fn create(
    State(monitor): State<AppState>,
    Json(new): Json<NewAlert>,
) -> Result<(StatusCode, Json<Alert>)> {
    // ---
    info!("POST /alerts - device {} {}", new.device_id, new.parameter_type);
    // Unknown devices are rejected rather than left with orphan alerts
    monitor.devices.get(new.device_id).await?;
    let alert = monitor.alerts.create(new).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

async fn summary(State(monitor): State<AppState>) -> Result<Json<AlertSummary>> {
    Ok(Json(monitor.alerts.summary().await?))
}

async fn acknowledge(
    State(monitor): State<AppState>,
    Path(id): Path<AlertId>,
) -> Result<Json<Alert>> {
    info!("POST /alerts/{}/acknowledge", id);
    Ok(Json(monitor.alerts.acknowledge(id).await?))
}

async fn resolve(State(monitor): State<AppState>, Path(id): Path<AlertId>) -> Result<Json<Alert>> {
    info!("POST /alerts/{}/resolve", id);
    Ok(Json(monitor.alerts.resolve(id).await?))
}

async fn resolve_for_device(
    State(monitor): State<AppState>,
    Path(id): Path<DeviceId>,
) -> Result<Json<BulkResolution>> {
    // ---
    info!("POST /devices/{}/alerts/resolve", id);
    monitor.devices.get(id).await?;
    Ok(Json(monitor.alerts.resolve_all_for_device(id).await?))
}

#[derive(Debug, Deserialize)]
struct BatchStatusRequest {
    ids: Vec<AlertId>,
    status: AlertStatus,
}

async fn batch_status(
    State(monitor): State<AppState>,
    Json(request): Json<BatchStatusRequest>,
) -> Json<BatchUpdateResult> {
    // ---
    info!(
        "POST /alerts/batch-status - {} alerts to {}",
        request.ids.len(),
        request.status
    );
    Json(
        monitor
            .alerts
            .batch_update_status(&request.ids, request.status)
            .await,
    )
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::config::TimingConfig;
    use crate::models::{AlertKind, Severity};
    use crate::monitor::Monitor;
    use crate::parameters::Parameter;
    use crate::store::{MemoryStore, Store};
    use crate::test_support::{capture_logs, device_at};
    use std::sync::Arc;

    #[tokio::test]
    async fn mutating_handlers_log_their_route() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let device = device_at(31.23, 121.47);
        store.insert_device(&device).await.unwrap();
        let (monitor, _jobs) = Monitor::new(store, TimingConfig::default());
        let (logs, _guard) = capture_logs();

        let new = NewAlert {
            device_id: device.id,
            parameter_type: AlertKind::Parameter(Parameter::Salinity),
            value: 41.0,
            threshold: 40.0,
            severity: Severity::Medium,
            message: "salinity high".into(),
        };
        let (status, Json(alert)) = create(State(monitor.clone()), Json(new)).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);

        acknowledge(State(monitor.clone()), Path(alert.id))
            .await
            .unwrap();
        let Json(batch) = batch_status(
            State(monitor.clone()),
            Json(BatchStatusRequest {
                ids: vec![alert.id],
                status: AlertStatus::Resolved,
            }),
        )
        .await;
        assert!(batch.results[0].success);
        resolve_for_device(State(monitor.clone()), Path(device.id))
            .await
            .unwrap();
        // Refused, but still logged
        assert!(resolve(State(monitor.clone()), Path(alert.id)).await.is_err());

        let out = logs.contents();
        for expected in [
            format!("POST /alerts - device {} salinity", device.id),
            format!("POST /alerts/{}/acknowledge", alert.id),
            "POST /alerts/batch-status - 1 alerts to resolved".to_string(),
            format!("POST /devices/{}/alerts/resolve", device.id),
            format!("POST /alerts/{}/resolve", alert.id),
        ] {
            assert!(out.contains(&expected), "missing {expected:?} in:\n{out}");
        }
    }
}
