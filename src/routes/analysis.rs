//! Statistics, trend aggregations and the anomaly sweep.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::readings::parse_timestamp_range;
use super::AppState;
use crate::analysis::{
    AnomalyReport, DailyAlerts, DashboardStats, HourlyBucket, ParameterStatistics,
    DEFAULT_LOOKBACK_HOURS,
};
use crate::error::Result;
use crate::models::DeviceId;
use crate::parameters::Parameter;

// ---

const DEFAULT_ALERT_TREND_DAYS: u32 = 7;
const DEFAULT_HOURLY_DAYS: u32 = 1;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/analysis/statistics", get(statistics))
        .route("/analysis/dashboard", get(dashboard))
        .route("/analysis/hourly", get(hourly))
        .route("/analysis/anomalies", post(anomalies))
        .route("/alerts/trends", get(alert_trends))
}

#[derive(Debug, Deserialize)]
struct StatisticsQuery {
    parameter: Parameter,
    /// Same `start,end` form as `GET /readings`.
    timestamp_range: Option<String>,
    device_id: Option<DeviceId>,
}

async fn statistics(
    State(monitor): State<AppState>,
    Query(params): Query<StatisticsQuery>,
) -> Result<Json<ParameterStatistics>> {
    // ---
    debug!("GET /analysis/statistics - {:?}", params);
    let (from, to) = match params.timestamp_range.as_deref() {
        Some(range) => parse_timestamp_range(range)?,
        None => (None, None),
    };
    let stats = monitor
        .analysis
        .statistics(params.parameter, from, to, params.device_id)
        .await?;
    Ok(Json(stats))
}

async fn dashboard(State(monitor): State<AppState>) -> Result<Json<DashboardStats>> {
    Ok(Json(monitor.analysis.dashboard().await?))
}

#[derive(Debug, Deserialize)]
struct HourlyQuery {
    parameter: Parameter,
    days: Option<u32>,
}

async fn hourly(
    State(monitor): State<AppState>,
    Query(params): Query<HourlyQuery>,
) -> Result<Json<Vec<HourlyBucket>>> {
    // ---
    let days = params.days.unwrap_or(DEFAULT_HOURLY_DAYS);
    Ok(Json(monitor.analysis.hourly_trends(params.parameter, days).await?))
}

#[derive(Debug, Deserialize)]
struct TrendQuery {
    days: Option<u32>,
}

async fn alert_trends(
    State(monitor): State<AppState>,
    Query(params): Query<TrendQuery>,
) -> Result<Json<Vec<DailyAlerts>>> {
    // ---
    let days = params.days.unwrap_or(DEFAULT_ALERT_TREND_DAYS);
    Ok(Json(monitor.analysis.alert_trends(days).await?))
}

#[derive(Debug, Deserialize)]
struct AnomalyQuery {
    device_id: Option<DeviceId>,
    lookback_hours: Option<u32>,
}

async fn anomalies(
    State(monitor): State<AppState>,
    Query(params): Query<AnomalyQuery>,
) -> Result<Json<AnomalyReport>> {
    // ---
    let lookback = params.lookback_hours.unwrap_or(DEFAULT_LOOKBACK_HOURS);
    info!("POST /analysis/anomalies - {:?}, {}h", params.device_id, lookback);
    let report = monitor
        .analysis
        .detect_anomalies(params.device_id, lookback)
        .await?;
    Ok(Json(report))
}
