//! Device registry: registration, updates, cascade removal and health.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::alerts::AlertManager;
use crate::error::{MonitorError, Result};
use crate::models::{
    AlertStatus, Device, DeviceConfig, DeviceId, DevicePatch, DeviceStatus, Location, NewDevice,
};
use crate::parameters::Parameter;
use crate::store::{AlertFilter, CascadeCounts, ReadingFilter, Store};

// ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: DeviceStatus,
    #[serde(default)]
    pub battery_level: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub device: Device,
    pub resolved_alerts: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    pub device_id: DeviceId,
    #[serde(flatten)]
    pub counts: CascadeCounts,
}

/// Freshness of `last_active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    /// Active within the last hour.
    Normal,
    /// Active within the last day.
    Warning,
    Critical,
}

impl Activity {
    pub fn from_age(age: chrono::Duration) -> Self {
        if age < chrono::Duration::hours(1) {
            Activity::Normal
        } else if age < chrono::Duration::hours(24) {
            Activity::Warning
        } else {
            Activity::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub id: DeviceId,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub status: DeviceStatus,
    pub health_score: u8,
    pub last_active: DateTime<Utc>,
    pub activity: Activity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    pub readings_last_week: u64,
    pub open_alerts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_reading: Option<DateTime<Utc>>,
}

const MAX_ALERT_PENALTY: i32 = 30;
const PENALTY_PER_ALERT: i32 = 5;

/// Health score in `0..=100`.
pub fn health_score(
    status: DeviceStatus,
    activity: Activity,
    battery_level: Option<f64>,
    new_alerts: usize,
) -> u8 {
    // ---
    let mut score: i32 = 100;

    if status != DeviceStatus::Online {
        score -= 30;
    }

    score -= match activity {
        Activity::Normal => 0,
        Activity::Warning => 15,
        Activity::Critical => 30,
    };

    match battery_level {
        Some(level) if level < 20.0 => score -= 20,
        Some(level) if level < 50.0 => score -= 10,
        _ => {}
    }

    let alerts = i32::try_from(new_alerts).unwrap_or(i32::MAX);
    score -= alerts.saturating_mul(PENALTY_PER_ALERT).min(MAX_ALERT_PENALTY);

    // Clamped, so the cast cannot truncate
    score.clamp(0, 100) as u8
}

#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<dyn Store>,
    alerts: AlertManager,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn Store>, alerts: AlertManager) -> Self {
        Self { store, alerts }
    }

    pub async fn register(&self, new: NewDevice) -> Result<Device> {
        // ---
        validate(&new)?;
        let device = new.into_device(Uuid::new_v4(), Utc::now());
        self.store.insert_device(&device).await?;
        info!(device_id = %device.id, name = %device.name, "device registered");
        Ok(device)
    }

    pub async fn get(&self, id: DeviceId) -> Result<Device> {
        self.store
            .get_device(id)
            .await?
            .ok_or(MonitorError::DeviceNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Device>> {
        self.store.list_devices().await
    }

    /// Replace name, type, location and config. Liveness fields and battery
    /// level are kept; those change through [`Self::update_status`].
    pub async fn update(&self, id: DeviceId, new: NewDevice) -> Result<Device> {
        // ---
        validate(&new)?;
        let mut device = self.get(id).await?;
        device.name = new.name;
        device.device_type = new.device_type;
        device.location = new.location;
        device.config = new.config;

        if !self.store.update_device(&device).await? {
            return Err(MonitorError::DeviceNotFound(id));
        }
        Ok(device)
    }

    /// Set status (and optionally battery). Coming back online from offline
    /// resolves every open alert of the device.
    pub async fn update_status(&self, id: DeviceId, change: StatusChange) -> Result<StatusUpdate> {
        // ---
        let before = self.get(id).await?;

        let patch = DevicePatch {
            status: Some(change.status),
            last_active: Some(Utc::now()),
            battery_level: change.battery_level,
            ..Default::default()
        };
        let device = self
            .store
            .patch_device(id, &patch)
            .await?
            .ok_or(MonitorError::DeviceNotFound(id))?;

        let resolved_alerts =
            if before.status == DeviceStatus::Offline && change.status == DeviceStatus::Online {
                self.alerts.resolve_all_for_device(id).await?.resolved_count
            } else {
                0
            };

        info!(
            device_id = %id,
            from = %before.status,
            to = %change.status,
            resolved_alerts,
            "device status updated"
        );
        Ok(StatusUpdate {
            device,
            resolved_alerts,
        })
    }

    /// Remove the device together with its readings and alerts.
    pub async fn delete(&self, id: DeviceId) -> Result<Removal> {
        // ---
        let counts = self
            .store
            .delete_device(id)
            .await?
            .ok_or(MonitorError::DeviceNotFound(id))?;

        info!(
            device_id = %id,
            readings = counts.deleted_readings,
            alerts = counts.deleted_alerts,
            "device deleted"
        );
        Ok(Removal {
            device_id: id,
            counts,
        })
    }

    /// Register the three demonstration devices.
    pub async fn create_samples(&self) -> Result<Vec<Device>> {
        // ---
        let mut created = Vec::new();
        for sample in sample_devices() {
            let battery = f64::from(rand::thread_rng().gen_range(95u8..=100));
            let new = NewDevice {
                battery_level: Some(battery),
                ..sample
            };
            created.push(self.register(new).await?);
        }
        Ok(created)
    }

    /// Health of one device, or of every device when `id` is `None`.
    pub async fn health(&self, id: Option<DeviceId>) -> Result<Vec<DeviceHealth>> {
        // ---
        let devices = match id {
            Some(id) => vec![self.get(id).await?],
            None => self.store.list_devices().await?,
        };

        let now = Utc::now();
        let mut report = Vec::with_capacity(devices.len());
        for device in devices {
            report.push(self.device_health(device, now).await?);
        }
        Ok(report)
    }

    async fn device_health(&self, device: Device, now: DateTime<Utc>) -> Result<DeviceHealth> {
        // ---
        let activity = Activity::from_age(now.signed_duration_since(device.last_active));

        let readings_last_week = self
            .store
            .count_readings_since(device.id, now - chrono::Duration::days(7))
            .await?;

        let latest_reading = self
            .store
            .list_readings(&ReadingFilter {
                device_id: Some(device.id),
                limit: Some(1),
                ..Default::default()
            })
            .await?
            .first()
            .map(|r| r.timestamp);

        let open_alerts = self
            .store
            .list_alerts(&AlertFilter {
                device_id: Some(device.id),
                statuses: vec![AlertStatus::New],
                limit: None,
            })
            .await?
            .len();

        Ok(DeviceHealth {
            health_score: health_score(device.status, activity, device.battery_level, open_alerts),
            id: device.id,
            name: device.name,
            device_type: device.device_type,
            status: device.status,
            last_active: device.last_active,
            activity,
            battery_level: device.battery_level,
            readings_last_week,
            open_alerts,
            latest_reading,
        })
    }
}

fn validate(new: &NewDevice) -> Result<()> {
    // ---
    if new.name.trim().is_empty() {
        return Err(MonitorError::BadRequest("device name must not be empty".into()));
    }
    let Location {
        latitude,
        longitude,
        ..
    } = new.location;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(MonitorError::BadRequest(format!(
            "location ({latitude}, {longitude}) is out of range"
        )));
    }
    Ok(())
}

fn sample(
    name: &str,
    device_type: &str,
    (latitude, longitude): (f64, f64),
    description: &str,
    (sample_rate, upload_interval): (u32, u32),
    parameters: Vec<Parameter>,
) -> NewDevice {
    NewDevice {
        name: name.into(),
        device_type: device_type.into(),
        location: Location {
            latitude,
            longitude,
            depth: None,
            description: Some(description.into()),
        },
        config: DeviceConfig {
            sample_rate,
            upload_interval,
            parameters,
        },
        battery_level: None,
    }
}

fn sample_devices() -> Vec<NewDevice> {
    use Parameter::*;

    vec![
        sample(
            "Buoy A1",
            "buoy",
            (31.2304, 121.4737),
            "East China Sea",
            (15, 60),
            vec![Temperature, Salinity, DissolvedOxygen, Ph],
        ),
        sample(
            "Seabed Station B2",
            "fixed station",
            (39.9042, 116.4074),
            "Bohai Bay",
            (10, 30),
            vec![Temperature, Salinity, FlowRate, DissolvedOxygen, Turbidity],
        ),
        sample(
            "Platform C3",
            "research platform",
            (22.5431, 114.0579),
            "South China Sea",
            (5, 15),
            Parameter::ALL.to_vec(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::alerts::NewAlert;
    use crate::models::{AlertKind, Reading, ReadingStatus, Severity};
    use crate::parameters::ParameterValues;
    use crate::store::MemoryStore;
    use crate::test_support::device_at;
    use tokio_test::assert_ok;

    fn registry() -> (Arc<MemoryStore>, DeviceRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = DeviceRegistry::new(store.clone(), AlertManager::new(store.clone()));
        (store, registry)
    }

    #[test]
    fn score_rules() {
        // ---
        use Activity::*;
        use DeviceStatus::*;

        assert_eq!(health_score(Online, Normal, Some(95.0), 0), 100);
        assert_eq!(health_score(Offline, Normal, None, 0), 70);
        assert_eq!(health_score(Online, Warning, Some(45.0), 0), 75);
        assert_eq!(health_score(Online, Critical, Some(10.0), 1), 45);
        // Alert penalty caps at 30
        assert_eq!(health_score(Online, Normal, None, 20), 70);
        // Never below zero
        assert_eq!(health_score(Maintenance, Critical, Some(1.0), 9), 0);
    }

    #[test]
    fn activity_bands() {
        // ---
        assert_eq!(Activity::from_age(chrono::Duration::minutes(59)), Activity::Normal);
        assert_eq!(Activity::from_age(chrono::Duration::hours(1)), Activity::Warning);
        assert_eq!(Activity::from_age(chrono::Duration::hours(24)), Activity::Critical);
    }

    #[tokio::test]
    async fn offline_to_online_resolves_alerts() {
        // ---
        let (store, registry) = registry();
        let mut device = device_at(39.9, 116.4);
        device.status = DeviceStatus::Offline;
        store.insert_device(&device).await.unwrap();

        let alerts = AlertManager::new(store.clone());
        for _ in 0..2 {
            assert_ok!(
                alerts
                    .create(NewAlert {
                        device_id: device.id,
                        parameter_type: AlertKind::DeviceStatus,
                        value: 0.0,
                        threshold: 1.0,
                        severity: Severity::High,
                        message: "offline".into(),
                    })
                    .await
            );
        }

        let update = registry
            .update_status(
                device.id,
                StatusChange {
                    status: DeviceStatus::Online,
                    battery_level: Some(42.0),
                },
            )
            .await
            .unwrap();
        assert_eq!(update.resolved_alerts, 2);
        assert_eq!(update.device.status, DeviceStatus::Online);
        assert_eq!(update.device.battery_level, Some(42.0));

        // Online -> maintenance leaves alerts alone
        let again = registry
            .update_status(
                device.id,
                StatusChange {
                    status: DeviceStatus::Maintenance,
                    battery_level: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(again.resolved_alerts, 0);
    }

    #[tokio::test]
    async fn delete_cascades() {
        // ---
        let (store, registry) = registry();
        let device = device_at(22.5, 114.0);
        store.insert_device(&device).await.unwrap();
        store
            .insert_reading(&Reading {
                id: Uuid::new_v4(),
                device_id: device.id,
                timestamp: Utc::now(),
                location: device.location.clone(),
                values: ParameterValues {
                    temperature: Some(20.0),
                    ..Default::default()
                },
                status: ReadingStatus::Normal,
            })
            .await
            .unwrap();

        let removal = registry.delete(device.id).await.unwrap();
        assert_eq!(removal.counts.deleted_readings, 1);
        assert_eq!(removal.counts.deleted_alerts, 0);
        assert!(matches!(
            registry.get(device.id).await,
            Err(MonitorError::DeviceNotFound(_))
        ));
        assert!(matches!(
            registry.delete(device.id).await,
            Err(MonitorError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn samples_and_health() {
        // ---
        let (_store, registry) = registry();
        let samples = registry.create_samples().await.unwrap();
        assert_eq!(samples.len(), 3);
        assert!(samples
            .iter()
            .all(|d| d.battery_level.is_some_and(|b| (95.0..=100.0).contains(&b))));
        assert_eq!(samples[2].config.parameters.len(), 6);

        let health = registry.health(None).await.unwrap();
        assert_eq!(health.len(), 3);
        assert!(health.iter().all(|h| h.health_score == 100));
        assert!(health.iter().all(|h| h.latest_reading.is_none()));

        let one = registry.health(Some(samples[0].id)).await.unwrap();
        assert_eq!(one[0].name, "Buoy A1");
    }

    #[tokio::test]
    async fn update_keeps_liveness_and_validates() {
        // ---
        let (_store, registry) = registry();
        let device = registry
            .register(sample(
                "Buoy",
                "buoy",
                (10.0, 10.0),
                "test",
                (15, 60),
                vec![Parameter::Temperature],
            ))
            .await
            .unwrap();

        let updated = registry
            .update(
                device.id,
                sample("Renamed", "buoy", (11.0, 10.0), "moved", (5, 15), vec![Parameter::Ph]),
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.last_active, device.last_active);

        let bad = registry
            .register(sample("Bad", "buoy", (91.0, 0.0), "x", (1, 1), vec![]))
            .await;
        assert!(matches!(bad, Err(MonitorError::BadRequest(_))));
    }
}
