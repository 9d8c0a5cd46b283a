//! Ocean sensor monitoring core.
//!
//! Devices report (or simulate) water-quality readings; the service stores
//! them, raises threshold and liveness alerts, and runs two self-scheduling
//! background loops: per-device reading simulation and the liveness scan.
//!
//! Module layout:
//! - `parameters`, `models`: the closed parameter set and the records
//! - `generator`: synthetic reading model
//! - `store`: persistence boundary (Postgres or in-memory)
//! - `alerts`, `readings`, `devices`: services over the store
//! - `analysis`: statistics, trends and the anomaly sweep
//! - `scheduler`, `simulation`, `liveness`, `monitor`: background work
//! - `routes`: the axum HTTP surface

pub mod alerts;
pub mod analysis;
pub mod config;
pub mod devices;
pub mod error;
pub mod generator;
pub mod liveness;
pub mod models;
pub mod monitor;
pub mod parameters;
pub mod readings;
pub mod routes;
pub mod scheduler;
pub mod schema;
pub mod simulation;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::{Config, TimingConfig};
pub use error::{MonitorError, Result};
pub use monitor::{run_jobs, Monitor};
