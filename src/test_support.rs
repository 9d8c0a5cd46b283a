//! Fixtures and a fault-injecting store for unit tests.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{MonitorError, Result};
use crate::models::{
    Alert, AlertId, AlertStatus, Device, DeviceConfig, DeviceId, DevicePatch, Location, NewDevice,
    Reading, ReadingId, ReadingStatus,
};
use crate::parameters::Parameter;
use crate::store::{AlertFilter, CascadeCounts, MemoryStore, ReadingFilter, Store};

// ---

/// An online, non-simulating buoy reporting the four thresholded parameters.
pub fn device_at(latitude: f64, longitude: f64) -> Device {
    NewDevice {
        name: format!("buoy-{latitude:.2}-{longitude:.2}"),
        device_type: "buoy".into(),
        location: Location {
            latitude,
            longitude,
            depth: None,
            description: None,
        },
        config: DeviceConfig {
            sample_rate: 15,
            upload_interval: 60,
            parameters: vec![
                Parameter::Temperature,
                Parameter::Salinity,
                Parameter::DissolvedOxygen,
                Parameter::Ph,
            ],
        },
        battery_level: Some(90.0),
    }
    .into_device(Uuid::new_v4(), Utc::now())
}

/// Log lines formatted by the subscriber [`capture_logs`] installs.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route `info` and above on the current thread into a [`LogBuffer`] until
/// the returned guard drops. Needs a current-thread runtime.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    // ---
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}

/// [`MemoryStore`] wrapper that fails selected operations on demand.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_patches: Mutex<HashSet<DeviceId>>,
    fail_listing: AtomicBool,
    reading_failures: AtomicUsize,
    alert_read_delay: Mutex<Option<Duration>>,
    delete_before_reading: Mutex<Option<DeviceId>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_patches_for(&self, id: DeviceId) {
        self.failing_patches.lock().insert(id);
    }

    pub fn fail_device_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` reading inserts fail.
    pub fn fail_next_reading_inserts(&self, n: usize) {
        self.reading_failures.store(n, Ordering::SeqCst);
    }

    /// Hold every `get_alert` result for `delay` before returning it, so the
    /// caller acts on a copy other writers may already have changed.
    pub fn delay_alert_reads(&self, delay: Duration) {
        *self.alert_read_delay.lock() = Some(delay);
    }

    /// Delete `id` just before the next reading insert runs.
    pub fn delete_before_next_reading(&self, id: DeviceId) {
        *self.delete_before_reading.lock() = Some(id);
    }

    fn injected(what: &str) -> MonitorError {
        MonitorError::Store(format!("injected {what} failure"))
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_device(&self, device: &Device) -> Result<()> {
        self.inner.insert_device(device).await
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>> {
        self.inner.get_device(id).await
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Self::injected("listing"));
        }
        self.inner.list_devices().await
    }

    async fn update_device(&self, device: &Device) -> Result<bool> {
        self.inner.update_device(device).await
    }

    async fn patch_device(&self, id: DeviceId, patch: &DevicePatch) -> Result<Option<Device>> {
        if self.failing_patches.lock().contains(&id) {
            return Err(Self::injected("patch"));
        }
        self.inner.patch_device(id, patch).await
    }

    async fn delete_device(&self, id: DeviceId) -> Result<Option<CascadeCounts>> {
        self.inner.delete_device(id).await
    }

    async fn insert_reading(&self, reading: &Reading) -> Result<()> {
        let remaining = self.reading_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.reading_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Self::injected("reading insert"));
        }
        let doomed = self.delete_before_reading.lock().take();
        if let Some(id) = doomed {
            self.inner.delete_device(id).await?;
        }
        self.inner.insert_reading(reading).await
    }

    async fn set_reading_status(&self, id: ReadingId, status: ReadingStatus) -> Result<()> {
        self.inner.set_reading_status(id, status).await
    }

    async fn recent_readings(&self, device_id: DeviceId, limit: usize) -> Result<Vec<Reading>> {
        self.inner.recent_readings(device_id, limit).await
    }

    async fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        self.inner.list_readings(filter).await
    }

    async fn count_readings(&self, filter: &ReadingFilter) -> Result<u64> {
        self.inner.count_readings(filter).await
    }

    async fn count_readings_since(
        &self,
        device_id: DeviceId,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        self.inner.count_readings_since(device_id, since).await
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.inner.insert_alert(alert).await
    }

    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>> {
        let alert = self.inner.get_alert(id).await?;
        let delay = *self.alert_read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(alert)
    }

    async fn set_alert_status(
        &self,
        id: AlertId,
        from: &[AlertStatus],
        to: AlertStatus,
    ) -> Result<Option<Alert>> {
        self.inner.set_alert_status(id, from, to).await
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        self.inner.list_alerts(filter).await
    }
}
