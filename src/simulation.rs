//! Simulation scheduler.
//!
//! While a device's `is_simulating` flag is set, a chain of
//! [`Job::GenerationTick`] jobs produces one synthetic reading per interval.
//! Each tick arms the next one before it returns; the flag, re-read at the
//! start of every tick, is what ends the chain.
//!
//! The tick key is per device and [`TaskQueue::run_after`] replaces a pending
//! timer for the same key, so racing `start` calls (or a `stop` immediately
//! followed by `start` while a tick is in flight) converge on one chain.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alerts::AlertManager;
use crate::error::{MonitorError, Result};
use crate::generator::generate_reading;
use crate::models::{Device, DeviceId, DevicePatch, DeviceStatus, Reading};
use crate::readings::{Accepted, OpenAlerts, ReadingService};
use crate::scheduler::{Job, TaskQueue};
use crate::store::Store;

// ---

/// Upper bound on readings written by one backfill request.
pub const MAX_BACKFILL_POINTS: u64 = 50_000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatus {
    pub device_id: DeviceId,
    pub is_simulating: bool,
    /// True when `start` found the device already simulating.
    pub already_running: bool,
    pub resolved_alerts: usize,
}

#[derive(Debug)]
pub enum TickOutcome {
    Generated(Box<Accepted>),
    /// Device gone or simulation off; no continuation armed.
    Terminated,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub device_id: DeviceId,
    pub inserted: u64,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SimulationScheduler {
    store: Arc<dyn Store>,
    readings: ReadingService,
    alerts: AlertManager,
    queue: TaskQueue,
    interval: Duration,
    history_window: usize,
}

impl SimulationScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        readings: ReadingService,
        alerts: AlertManager,
        queue: TaskQueue,
        interval: Duration,
        history_window: usize,
    ) -> Self {
        Self {
            store,
            readings,
            alerts,
            queue,
            interval,
            history_window,
        }
    }

    /// Turn simulation on. Idempotent: only the call that flips the flag
    /// arms the first tick.
    pub async fn start(&self, id: DeviceId) -> Result<SimulationStatus> {
        // ---
        let before = self
            .store
            .get_device(id)
            .await?
            .ok_or(MonitorError::DeviceNotFound(id))?;

        let patch = DevicePatch {
            is_simulating: Some(true),
            ..DevicePatch::online(Utc::now())
        };
        self.store
            .patch_device(id, &patch)
            .await?
            .ok_or(MonitorError::DeviceNotFound(id))?;

        let resolved_alerts = if before.status == DeviceStatus::Offline {
            self.alerts.resolve_all_for_device(id).await?.resolved_count
        } else {
            0
        };

        if !before.is_simulating {
            self.queue.run_after(Duration::ZERO, Job::GenerationTick(id));
            info!(device_id = %id, name = %before.name, "simulation started");
        } else {
            debug!(device_id = %id, "simulation already running");
        }

        Ok(SimulationStatus {
            device_id: id,
            is_simulating: true,
            already_running: before.is_simulating,
            resolved_alerts,
        })
    }

    /// Turn simulation off. The pending tick is cancelled when possible; a
    /// tick already running sees the cleared flag and does not re-arm.
    pub async fn stop(&self, id: DeviceId) -> Result<SimulationStatus> {
        // ---
        let patch = DevicePatch {
            is_simulating: Some(false),
            ..Default::default()
        };
        self.store
            .patch_device(id, &patch)
            .await?
            .ok_or(MonitorError::DeviceNotFound(id))?;

        let cancelled = self.queue.cancel(&Job::GenerationTick(id));
        info!(device_id = %id, cancelled, "simulation stopped");

        Ok(SimulationStatus {
            device_id: id,
            is_simulating: false,
            already_running: false,
            resolved_alerts: 0,
        })
    }

    /// Arm a tick for a device whose flag survived a restart. Timers live in
    /// process memory, so nothing else would continue its chain.
    pub fn resume(&self, id: DeviceId) {
        self.queue.run_after(Duration::ZERO, Job::GenerationTick(id));
    }

    pub async fn list_simulating(&self) -> Result<Vec<Device>> {
        let devices = self.store.list_devices().await?;
        Ok(devices.into_iter().filter(|d| d.is_simulating).collect())
    }

    /// One generation step for `id`.
    pub async fn tick(&self, id: DeviceId) -> Result<TickOutcome> {
        // ---
        let device = match self.store.get_device(id).await {
            Ok(Some(device)) if device.is_simulating => device,
            Ok(_) => {
                debug!(device_id = %id, "simulation chain ended");
                return Ok(TickOutcome::Terminated);
            }
            Err(err) => {
                self.rearm_if_simulating(id).await;
                return Err(err);
            }
        };

        let outcome = self.generate(&device).await;
        self.rearm_if_simulating(id).await;

        let accepted = match outcome {
            // Deleted between the flag read and the write; the store kept nothing
            Err(MonitorError::DeviceNotFound(_)) => {
                debug!(device_id = %id, "device removed during tick");
                return Ok(TickOutcome::Terminated);
            }
            other => other?,
        };
        debug!(
            device_id = %id,
            reading_id = %accepted.reading.id,
            raised = accepted.raised_alerts,
            "generated reading"
        );
        Ok(TickOutcome::Generated(Box::new(accepted)))
    }

    async fn generate(&self, device: &Device) -> Result<Accepted> {
        // ---
        let history = self
            .store
            .recent_readings(device.id, self.history_window)
            .await?;

        let reading = {
            let mut rng = rand::thread_rng();
            generate_reading(device, Utc::now(), &history, &mut rng)
        };

        self.readings
            .accept(device, reading, OpenAlerts::ResolveOnRecovery)
            .await
    }

    /// Arm the next tick unless the device is known to have stopped. When
    /// the flag cannot be read the tick is armed anyway; the next tick
    /// re-checks it.
    async fn rearm_if_simulating(&self, id: DeviceId) {
        // ---
        let rearm = match self.store.get_device(id).await {
            Ok(device) => device.is_some_and(|d| d.is_simulating),
            Err(err) => {
                warn!(device_id = %id, error = %err, "could not re-read simulation flag");
                true
            }
        };
        if rearm {
            self.queue.run_after(self.interval, Job::GenerationTick(id));
        }
    }

    /// Write `days * points_per_day` evenly spaced synthetic readings ending
    /// at `start + days`. Readings are stored as-is: no liveness update and
    /// no alerting.
    pub async fn backfill(
        &self,
        id: DeviceId,
        days: u32,
        points_per_day: u32,
        start: Option<DateTime<Utc>>,
    ) -> Result<BackfillReport> {
        // ---
        let total = u64::from(days) * u64::from(points_per_day);
        if total == 0 {
            return Err(MonitorError::BadRequest(
                "days and pointsPerDay must be positive".into(),
            ));
        }
        if total > MAX_BACKFILL_POINTS {
            return Err(MonitorError::BadRequest(format!(
                "{total} points requested, at most {MAX_BACKFILL_POINTS} per request"
            )));
        }

        let device = self
            .store
            .get_device(id)
            .await?
            .ok_or(MonitorError::DeviceNotFound(id))?;

        let from = start.unwrap_or_else(|| Utc::now() - chrono::Duration::days(i64::from(days)));
        let step = chrono::Duration::milliseconds(86_400_000 / i64::from(points_per_day));

        let mut history: Vec<Reading> = Vec::with_capacity(self.history_window + 1);
        let mut at = from;
        let mut last = from;
        for _ in 0..total {
            let reading = {
                let mut rng = rand::thread_rng();
                generate_reading(&device, at, &history, &mut rng)
            };
            self.store.insert_reading(&reading).await?;

            last = at;
            at += step;
            history.push(reading);
            if history.len() > self.history_window {
                history.remove(0);
            }
        }

        info!(device_id = %id, inserted = total, from = %from, to = %last, "backfill complete");
        Ok(BackfillReport {
            device_id: id,
            inserted: total,
            from,
            to: last,
        })
    }
}
