//! Persistence boundary for device, reading and alert records.
//!
//! The services never touch a database directly; they go through [`Store`].
//! Every method is atomic on its own, but nothing spans several calls: a
//! simulation tick that writes a reading and then patches the device can be
//! interrupted between the two. Callers treat that as a best-effort window
//! (the next accepted reading or liveness scan repairs device state) rather
//! than assuming multi-record atomicity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Alert, AlertId, AlertStatus, Device, DeviceId, DevicePatch, Reading, ReadingId, ReadingStatus,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Filter for reading queries. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct ReadingFilter {
    pub device_id: Option<DeviceId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ReadingFilter {
    pub fn matches(&self, reading: &Reading) -> bool {
        self.device_id.map_or(true, |id| reading.device_id == id)
            && self.from.map_or(true, |from| reading.timestamp >= from)
            && self.to.map_or(true, |to| reading.timestamp <= to)
    }
}

/// Filter for alert queries. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub device_id: Option<DeviceId>,
    /// Empty means any status.
    pub statuses: Vec<AlertStatus>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn open_for_device(device_id: DeviceId) -> Self {
        Self {
            device_id: Some(device_id),
            statuses: vec![AlertStatus::New, AlertStatus::Acknowledged],
            limit: None,
        }
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.device_id.map_or(true, |id| alert.device_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&alert.status))
    }
}

/// Rows removed by a device cascade delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeCounts {
    pub deleted_readings: u64,
    pub deleted_alerts: u64,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // Devices
    async fn insert_device(&self, device: &Device) -> Result<()>;
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>>;
    async fn list_devices(&self) -> Result<Vec<Device>>;
    /// Replace the descriptive fields and config. Returns false if missing.
    async fn update_device(&self, device: &Device) -> Result<bool>;
    /// Returns the patched device, or `None` if it does not exist.
    async fn patch_device(&self, id: DeviceId, patch: &DevicePatch) -> Result<Option<Device>>;
    /// Delete the device with its readings and alerts.
    async fn delete_device(&self, id: DeviceId) -> Result<Option<CascadeCounts>>;

    // Readings
    async fn insert_reading(&self, reading: &Reading) -> Result<()>;
    async fn set_reading_status(&self, id: ReadingId, status: ReadingStatus) -> Result<()>;
    /// Up to `limit` most recent readings, ordered oldest to newest.
    async fn recent_readings(&self, device_id: DeviceId, limit: usize) -> Result<Vec<Reading>>;
    async fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>>;
    /// Number of readings matching `filter`; its limit is ignored.
    async fn count_readings(&self, filter: &ReadingFilter) -> Result<u64>;
    async fn count_readings_since(&self, device_id: DeviceId, since: DateTime<Utc>)
        -> Result<u64>;

    // Alerts
    async fn insert_alert(&self, alert: &Alert) -> Result<()>;
    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>>;
    /// Set `to` only if the alert is currently in one of `from`, in a single
    /// atomic step. Returns the updated alert, or `None` when it is missing
    /// or was in some other status.
    async fn set_alert_status(
        &self,
        id: AlertId,
        from: &[AlertStatus],
        to: AlertStatus,
    ) -> Result<Option<Alert>>;
    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>>;
}
