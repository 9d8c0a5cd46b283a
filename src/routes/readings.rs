//! Reading ingestion and query endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::AppState;
use crate::error::{MonitorError, Result};
use crate::models::{DeviceId, Reading};
use crate::readings::{Accepted, IngestReading, DEFAULT_LIST_LIMIT};
use crate::store::ReadingFilter;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/readings", get(list).post(ingest))
}

async fn ingest(
    State(monitor): State<AppState>,
    Json(payload): Json<IngestReading>,
) -> Result<(StatusCode, Json<Accepted>)> {
    // ---
    info!("POST /readings - device {}", payload.device_id);
    let accepted = monitor.readings.ingest(payload).await?;
    Ok((StatusCode::CREATED, Json(accepted)))
}

/// Query parameters for filtering readings.
#[derive(Debug, Deserialize)]
pub struct ReadingsQuery {
    device_id: Option<DeviceId>,
    /// Inclusive range, e.g. "2025-03-21T00:00:00Z,2025-03-22T00:00:00Z".
    /// Either side may be left empty.
    timestamp_range: Option<String>,
    limit: Option<usize>,
}

async fn list(
    State(monitor): State<AppState>,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<Vec<Reading>>> {
    // ---
    debug!("GET /readings - {:?}", params);
    let (from, to) = match params.timestamp_range.as_deref() {
        Some(range) => parse_timestamp_range(range)?,
        None => (None, None),
    };

    let filter = ReadingFilter {
        device_id: params.device_id,
        from,
        to,
        limit: Some(params.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
    };
    Ok(Json(monitor.readings.list(&filter).await?))
}

type Bound = Option<DateTime<Utc>>;

/// Parse `"start,end"` into optional RFC 3339 bounds.
pub(super) fn parse_timestamp_range(range: &str) -> Result<(Bound, Bound)> {
    // ---
    let (start, end) = range.split_once(',').ok_or_else(|| {
        MonitorError::BadRequest(format!("timestamp_range must be 'start,end', got '{range}'"))
    })?;

    let parse = |s: &str| -> Result<Bound> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| MonitorError::BadRequest(format!("invalid timestamp '{s}': {e}")))
    };

    let (from, to) = (parse(start)?, parse(end)?);
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(MonitorError::BadRequest(
                "timestamp_range start is after its end".into(),
            ));
        }
    }
    Ok((from, to))
}
