use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{AlertFilter, CascadeCounts, ReadingFilter, Store};
use crate::error::{MonitorError, Result};
use crate::models::{
    Alert, AlertId, AlertStatus, Device, DeviceId, DevicePatch, Reading, ReadingId, ReadingStatus,
};

// ---

/// Process-local store used when no database is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<DeviceId, Device>,
    readings: HashMap<DeviceId, Vec<Reading>>,
    alerts: HashMap<AlertId, Alert>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(items: &mut [T], timestamp: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by(|a, b| timestamp(b).cmp(&timestamp(a)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_device(&self, device: &Device) -> Result<()> {
        self.inner.write().devices.insert(device.id, device.clone());
        Ok(())
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>> {
        Ok(self.inner.read().devices.get(&id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self.inner.read().devices.values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    async fn update_device(&self, device: &Device) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.devices.get_mut(&device.id) {
            Some(existing) => {
                existing.name = device.name.clone();
                existing.device_type = device.device_type.clone();
                existing.location = device.location.clone();
                existing.config = device.config.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn patch_device(&self, id: DeviceId, patch: &DevicePatch) -> Result<Option<Device>> {
        let mut inner = self.inner.write();
        Ok(inner.devices.get_mut(&id).map(|device| {
            patch.apply(device);
            device.clone()
        }))
    }

    async fn delete_device(&self, id: DeviceId) -> Result<Option<CascadeCounts>> {
        let mut inner = self.inner.write();
        if inner.devices.remove(&id).is_none() {
            return Ok(None);
        }
        let deleted_readings = inner.readings.remove(&id).map_or(0, |r| r.len() as u64);
        let before = inner.alerts.len();
        inner.alerts.retain(|_, alert| alert.device_id != id);
        let deleted_alerts = (before - inner.alerts.len()) as u64;

        Ok(Some(CascadeCounts {
            deleted_readings,
            deleted_alerts,
        }))
    }

    async fn insert_reading(&self, reading: &Reading) -> Result<()> {
        let mut inner = self.inner.write();
        // Same rule as the readings foreign key in Postgres
        if !inner.devices.contains_key(&reading.device_id) {
            return Err(MonitorError::DeviceNotFound(reading.device_id));
        }
        inner
            .readings
            .entry(reading.device_id)
            .or_default()
            .push(reading.clone());
        Ok(())
    }

    async fn set_reading_status(&self, id: ReadingId, status: ReadingStatus) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(reading) = inner
            .readings
            .values_mut()
            .flat_map(|r| r.iter_mut())
            .find(|r| r.id == id)
        {
            reading.status = status;
        }
        Ok(())
    }

    async fn recent_readings(&self, device_id: DeviceId, limit: usize) -> Result<Vec<Reading>> {
        let inner = self.inner.read();
        let mut readings = inner.readings.get(&device_id).cloned().unwrap_or_default();
        readings.sort_by_key(|r| r.timestamp);
        let skip = readings.len().saturating_sub(limit);
        Ok(readings.split_off(skip))
    }

    async fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        let inner = self.inner.read();
        let mut readings: Vec<Reading> = inner
            .readings
            .values()
            .flatten()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        newest_first(&mut readings, |r| r.timestamp);
        if let Some(limit) = filter.limit {
            readings.truncate(limit);
        }
        Ok(readings)
    }

    async fn count_readings(&self, filter: &ReadingFilter) -> Result<u64> {
        let inner = self.inner.read();
        Ok(inner
            .readings
            .values()
            .flatten()
            .filter(|r| filter.matches(r))
            .count() as u64)
    }

    async fn count_readings_since(
        &self,
        device_id: DeviceId,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let inner = self.inner.read();
        Ok(inner
            .readings
            .get(&device_id)
            .map_or(0, |r| r.iter().filter(|r| r.timestamp >= since).count() as u64))
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.inner.write().alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>> {
        Ok(self.inner.read().alerts.get(&id).cloned())
    }

    async fn set_alert_status(
        &self,
        id: AlertId,
        from: &[AlertStatus],
        to: AlertStatus,
    ) -> Result<Option<Alert>> {
        let mut inner = self.inner.write();
        Ok(inner
            .alerts
            .get_mut(&id)
            .filter(|alert| from.contains(&alert.status))
            .map(|alert| {
                alert.status = to;
                alert.clone()
            }))
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let inner = self.inner.read();
        let mut alerts: Vec<Alert> = inner
            .alerts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        newest_first(&mut alerts, |a| a.timestamp);
        if let Some(limit) = filter.limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::parameters::ParameterValues;
    use crate::test_support::device_at;
    use uuid::Uuid;

    fn reading_for(device: &Device) -> Reading {
        Reading {
            id: Uuid::new_v4(),
            device_id: device.id,
            timestamp: Utc::now(),
            location: device.location.clone(),
            values: ParameterValues {
                salinity: Some(35.0),
                ..Default::default()
            },
            status: ReadingStatus::Normal,
        }
    }

    #[tokio::test]
    async fn readings_require_a_live_device() {
        // ---
        let store = MemoryStore::new();
        let device = device_at(31.23, 121.47);

        assert!(matches!(
            store.insert_reading(&reading_for(&device)).await,
            Err(MonitorError::DeviceNotFound(id)) if id == device.id
        ));

        store.insert_device(&device).await.unwrap();
        store.insert_reading(&reading_for(&device)).await.unwrap();
        let counts = store.delete_device(device.id).await.unwrap().unwrap();
        assert_eq!(counts.deleted_readings, 1);

        // A late write for the deleted device leaves nothing behind
        assert!(store.insert_reading(&reading_for(&device)).await.is_err());
        assert!(store
            .list_readings(&ReadingFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn alert_status_is_compare_and_set() {
        // ---
        let store = MemoryStore::new();
        let device = device_at(0.0, 0.0);
        let alert = Alert::offline(&device, Utc::now());
        store.insert_alert(&alert).await.unwrap();

        let acked = store
            .set_alert_status(alert.id, &[AlertStatus::New], AlertStatus::Acknowledged)
            .await
            .unwrap();
        assert_eq!(acked.map(|a| a.status), Some(AlertStatus::Acknowledged));

        // No longer `new`, so the same move is refused and nothing changes
        let again = store
            .set_alert_status(alert.id, &[AlertStatus::New], AlertStatus::Resolved)
            .await
            .unwrap();
        assert!(again.is_none());
        let stored = store.get_alert(alert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Acknowledged);

        let missing = store
            .set_alert_status(Uuid::new_v4(), &[AlertStatus::New], AlertStatus::Resolved)
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
