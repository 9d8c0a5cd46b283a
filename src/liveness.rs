//! Liveness monitor.
//!
//! Periodically marks silent devices offline. Only devices currently
//! `online` can transition, so an offline device does not collect a fresh
//! alert on every scan. Bringing a device back online is not done here; it
//! happens when a reading is accepted for it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::alerts::AlertManager;
use crate::error::Result;
use crate::models::{Alert, Device, DeviceId, DevicePatch, DeviceStatus};
use crate::scheduler::{Job, TaskQueue};
use crate::store::Store;

// ---

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scanned: usize,
    pub marked_offline: Vec<DeviceId>,
    pub failures: usize,
}

#[derive(Clone)]
pub struct LivenessMonitor {
    store: Arc<dyn Store>,
    alerts: AlertManager,
    queue: TaskQueue,
    staleness_threshold: Duration,
    scan_interval: Duration,
}

impl LivenessMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        alerts: AlertManager,
        queue: TaskQueue,
        staleness_threshold: Duration,
        scan_interval: Duration,
    ) -> Self {
        Self {
            store,
            alerts,
            queue,
            staleness_threshold,
            scan_interval,
        }
    }

    /// Arm the first scheduled scan.
    pub fn bootstrap(&self) {
        self.queue.run_after(Duration::ZERO, Job::LivenessScan);
    }

    /// Entry point for the recurring job: re-arm first, then scan, so a
    /// failing scan never stops the loop.
    pub async fn run_scheduled(&self) -> Result<ScanReport> {
        self.queue.run_after(self.scan_interval, Job::LivenessScan);
        self.scan().await
    }

    pub async fn scan(&self) -> Result<ScanReport> {
        self.scan_at(Utc::now()).await
    }

    /// One pass over every device, judged against `now`.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        // ---
        let devices = self.store.list_devices().await?;
        let mut report = ScanReport {
            scanned: devices.len(),
            ..Default::default()
        };

        for device in &devices {
            match self.check_device(device, now).await {
                Ok(true) => report.marked_offline.push(device.id),
                Ok(false) => {}
                Err(err) => {
                    report.failures += 1;
                    warn!(device_id = %device.id, error = %err, "liveness check failed");
                }
            }
        }

        if !report.marked_offline.is_empty() || report.failures > 0 {
            info!(
                scanned = report.scanned,
                offline = report.marked_offline.len(),
                failures = report.failures,
                "liveness scan complete"
            );
        }
        Ok(report)
    }

    fn is_stale(&self, device: &Device, now: DateTime<Utc>) -> bool {
        // Negative age (clock skew) is never stale
        now.signed_duration_since(device.last_active)
            .to_std()
            .is_ok_and(|age| age > self.staleness_threshold)
    }

    /// Returns true when the device was moved offline.
    async fn check_device(&self, device: &Device, now: DateTime<Utc>) -> Result<bool> {
        // ---
        if device.status != DeviceStatus::Online || !self.is_stale(device, now) {
            return Ok(false);
        }

        let patch = DevicePatch {
            status: Some(DeviceStatus::Offline),
            ..Default::default()
        };
        if self.store.patch_device(device.id, &patch).await?.is_none() {
            // Deleted since the listing
            return Ok(false);
        }

        warn!(
            device_id = %device.id,
            name = %device.name,
            last_active = %device.last_active,
            "device went offline"
        );
        self.alerts.insert(&Alert::offline(device, now)).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{AlertKind, AlertStatus, Severity};
    use crate::store::{AlertFilter, MemoryStore};
    use crate::test_support::{device_at, FlakyStore};

    const FIFTEEN_MIN: Duration = Duration::from_secs(15 * 60);

    fn monitor(store: Arc<dyn Store>) -> LivenessMonitor {
        let (queue, _rx) = TaskQueue::new();
        LivenessMonitor::new(
            store.clone(),
            AlertManager::new(store),
            queue,
            FIFTEEN_MIN,
            Duration::from_secs(10 * 60),
        )
    }

    #[tokio::test]
    async fn stale_online_device_goes_offline_with_one_alert() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let mut device = device_at(31.23, 121.47);
        device.last_active = now - chrono::Duration::minutes(20);
        store.insert_device(&device).await.unwrap();

        let liveness = monitor(store.clone());
        let report = liveness.scan_at(now).await.unwrap();
        assert_eq!(report.marked_offline, vec![device.id]);

        let stored = store.get_device(device.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeviceStatus::Offline);

        let alerts = store.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.parameter_type, AlertKind::DeviceStatus);
        assert_eq!(alert.value, 0.0);
        assert_eq!(alert.threshold, 1.0);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.status, AlertStatus::New);
        assert!(alert.message.contains(&device.id.to_string()));

        // Same offline period, no duplicate
        let again = liveness
            .scan_at(now + chrono::Duration::minutes(30))
            .await
            .unwrap();
        assert!(again.marked_offline.is_empty());
        assert_eq!(store.list_alerts(&AlertFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fresh_and_maintenance_devices_are_untouched() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let mut fresh = device_at(10.0, 10.0);
        fresh.last_active = now - chrono::Duration::minutes(14);
        let mut maintenance = device_at(20.0, 20.0);
        maintenance.status = DeviceStatus::Maintenance;
        maintenance.last_active = now - chrono::Duration::days(3);
        store.insert_device(&fresh).await.unwrap();
        store.insert_device(&maintenance).await.unwrap();

        let report = monitor(store.clone()).scan_at(now).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert!(report.marked_offline.is_empty());
        assert!(store.list_alerts(&AlertFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failing_device_does_not_abort_the_scan() {
        // ---
        let store = Arc::new(FlakyStore::new());
        let now = Utc::now();
        let stale = now - chrono::Duration::hours(1);

        let mut broken = device_at(1.0, 1.0);
        broken.last_active = stale;
        let mut healthy = device_at(2.0, 2.0);
        healthy.last_active = stale;
        store.insert_device(&broken).await.unwrap();
        store.insert_device(&healthy).await.unwrap();
        store.fail_patches_for(broken.id);

        let report = monitor(store.clone()).scan_at(now).await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.marked_offline, vec![healthy.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_run_rearms_before_scanning() {
        // ---
        let store = Arc::new(FlakyStore::new());
        store.fail_device_listing(true);

        let (queue, _rx) = TaskQueue::new();
        let liveness = LivenessMonitor::new(
            store.clone(),
            AlertManager::new(store),
            queue.clone(),
            FIFTEEN_MIN,
            Duration::from_secs(600),
        );

        assert!(liveness.run_scheduled().await.is_err());
        assert!(queue.is_pending(&Job::LivenessScan));
    }
}
