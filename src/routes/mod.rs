//! HTTP gateway: merges one sub-router per resource and attaches the shared
//! [`Monitor`] as state.

use std::sync::Arc;

use axum::Router;

use crate::monitor::Monitor;

mod alerts;
mod analysis;
mod devices;
mod health;
mod readings;
mod simulation;

// ---

pub type AppState = Arc<Monitor>;

pub fn router(monitor: AppState) -> Router {
    // ---
    Router::new()
        .merge(devices::router())
        .merge(simulation::router())
        .merge(readings::router())
        .merge(alerts::router())
        .merge(analysis::router())
        .merge(health::router())
        .with_state(monitor)
}
