//! Application entry point for the `ocean-monitor` service.
//!
//! Startup sequence:
//! - Load configuration from environment variables or `.env`
//! - Initialize structured logging/tracing
//! - Select the store: PostgreSQL when `DATABASE_URL` is set (schema created
//!   on connect), otherwise the in-memory store
//! - Start the job worker and arm the recurring liveness scan
//! - Mount all API routes via the `routes` gateway and serve until Ctrl-C
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – PostgreSQL connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `BIND_ADDR` (optional) – listen address (default: `0.0.0.0:8080`)
//! - `MONITOR_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `MONITOR_SPAN_EVENTS` (optional) – span event mode for tracing
//! - timing variables, see [`ocean_monitor::config::load_from_env`]
use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use ocean_monitor::store::{MemoryStore, PgStore, Store};
use ocean_monitor::{config, routes, run_jobs, Monitor};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store: Arc<dyn Store> = match cfg.db_url.as_deref() {
        Some(db_url) => {
            let store = PgStore::connect(db_url, cfg.db_pool_max)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Successfully connected to database");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let (monitor, jobs) = Monitor::new(store, cfg.timing);
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(run_jobs(monitor.clone(), jobs, shutdown.clone()));

    resume_simulations(&monitor).await;
    monitor.liveness.bootstrap();

    // Build app from routes gateway
    let app: Router = routes::router(monitor);

    tracing::info!("Listening on {}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    worker.await?;
    Ok(())
}

/// Re-arm the tick chain of devices left simulating by a previous run.
async fn resume_simulations(monitor: &Monitor) {
    // ---
    match monitor.simulation.list_simulating().await {
        Ok(devices) => {
            for device in &devices {
                monitor.simulation.resume(device.id);
            }
            if !devices.is_empty() {
                tracing::info!(count = devices.len(), "resumed simulations");
            }
        }
        Err(err) => tracing::warn!(error = %err, "could not resume simulations"),
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    // ---
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl-C");
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// - Color output controlled by TTY detection and `FORCE_COLOR`:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span events controlled by `MONITOR_SPAN_EVENTS`:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level from `RUST_LOG`, falling back to `MONITOR_LOG_LEVEL`
///
/// Call once at startup, before any logging macro runs.
fn init_tracing() {
    // ---
    let span_events = match env::var("MONITOR_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("MONITOR_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
