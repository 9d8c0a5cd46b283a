//! Configuration loader for the `ocean-monitor` service.
//!
//! All runtime settings come from environment variables (the caller loads an
//! optional `.env` first). Nothing else in the crate reads `env::var` apart
//! from the tracing setup in `main.rs`.
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Timing of the two background loops.
///
/// `staleness_threshold` must exceed `simulation_interval`, otherwise a
/// healthy simulating device would be marked offline between two ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub simulation_interval: Duration,
    pub staleness_threshold: Duration,
    pub liveness_scan_interval: Duration,
    /// Readings handed to the generator as history.
    pub history_window: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            simulation_interval: Duration::from_secs(30),
            staleness_threshold: Duration::from_secs(45),
            liveness_scan_interval: Duration::from_secs(30),
            history_window: 10,
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.simulation_interval.is_zero()
            || self.staleness_threshold.is_zero()
            || self.liveness_scan_interval.is_zero()
        {
            bail!("simulation, staleness and scan intervals must be non-zero");
        }
        if self.staleness_threshold <= self.simulation_interval {
            bail!(
                "STALENESS_THRESHOLD_SECS ({}s) must be greater than SIMULATION_INTERVAL_SECS ({}s)",
                self.staleness_threshold.as_secs(),
                self.simulation_interval.as_secs()
            );
        }
        Ok(())
    }
}

/// Strongly typed application configuration, immutable after loading.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string. `None` selects the in-memory store.
    pub db_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    pub bind_addr: SocketAddr,

    pub timing: TimingConfig,
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `DATABASE_URL` – PostgreSQL connection string (default: in-memory store)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `BIND_ADDR` – listen address (default: `0.0.0.0:8080`)
/// - `SIMULATION_INTERVAL_SECS` (default: 30)
/// - `STALENESS_THRESHOLD_SECS` (default: 45)
/// - `LIVENESS_SCAN_INTERVAL_SECS` (default: 30)
/// - `HISTORY_WINDOW` – readings used for continuity (default: 10)
///
/// Returns an error if any variable is invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
    let db_pool_max = u32::try_from(parse_env_u64!("DB_POOL_MAX", 5))
        .map_err(|e| anyhow!("Invalid DB_POOL_MAX: {}", e))?;

    let bind_addr = env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse::<SocketAddr>()
        .map_err(|e| anyhow!("Invalid BIND_ADDR: {}", e))?;

    let defaults = TimingConfig::default();
    let timing = TimingConfig {
        simulation_interval: Duration::from_secs(parse_env_u64!(
            "SIMULATION_INTERVAL_SECS",
            defaults.simulation_interval.as_secs()
        )),
        staleness_threshold: Duration::from_secs(parse_env_u64!(
            "STALENESS_THRESHOLD_SECS",
            defaults.staleness_threshold.as_secs()
        )),
        liveness_scan_interval: Duration::from_secs(parse_env_u64!(
            "LIVENESS_SCAN_INTERVAL_SECS",
            defaults.liveness_scan_interval.as_secs()
        )),
        history_window: usize::try_from(parse_env_u64!(
            "HISTORY_WINDOW",
            defaults.history_window as u64
        ))
        .map_err(|e| anyhow!("Invalid HISTORY_WINDOW: {}", e))?,
    };
    timing.validate()?;

    Ok(Config {
        db_url,
        db_pool_max,
        bind_addr,
        timing,
    })
}

/// Replace the password in a connection URL with `****`.
fn mask_password(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // `postgres://host@...` has its only colon in the scheme
            if !db_url[colon_pos..].starts_with("://") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}

impl Config {
    /// Log the loaded configuration, with the database password masked.
    pub fn log_config(&self) {
        // ---
        let db = self
            .db_url
            .as_deref()
            .map_or_else(|| "<unset, in-memory store>".to_string(), mask_password);

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL                : {}", db);
        tracing::info!("  DB_POOL_MAX                 : {}", self.db_pool_max);
        tracing::info!("  BIND_ADDR                   : {}", self.bind_addr);
        tracing::info!(
            "  SIMULATION_INTERVAL_SECS    : {}",
            self.timing.simulation_interval.as_secs()
        );
        tracing::info!(
            "  STALENESS_THRESHOLD_SECS    : {}",
            self.timing.staleness_threshold.as_secs()
        );
        tracing::info!(
            "  LIVENESS_SCAN_INTERVAL_SECS : {}",
            self.timing.liveness_scan_interval.as_secs()
        );
        tracing::info!("  HISTORY_WINDOW              : {}", self.timing.history_window);
    }
}
