//! Reading acceptance: ingestion and the shared write path.
//!
//! Both external ingestion and simulation ticks land readings through
//! [`ReadingService::accept`]: write the reading, refresh the device's
//! liveness, handle an `offline -> online` recovery, then run the threshold
//! check. The threshold check only annotates and alerts; its failures are
//! logged and never undo the write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerts::AlertManager;
use crate::error::{MonitorError, Result};
use crate::models::{
    Alert, Device, DeviceId, DevicePatch, DeviceStatus, Location, Reading, ReadingStatus,
};
use crate::parameters::ParameterValues;
use crate::store::{ReadingFilter, Store};

// ---

pub const DEFAULT_LIST_LIMIT: usize = 1000;

/// Ingestion payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReading {
    pub device_id: DeviceId,
    /// Defaults to the time of ingestion.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub location: Location,
    #[serde(flatten)]
    pub values: ParameterValues,
}

/// How [`ReadingService::accept`] treats alerts already open for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAlerts {
    /// Resolve them on every accepted reading.
    ResolveAlways,
    /// Resolve them only on an `offline -> online` recovery.
    ResolveOnRecovery,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub reading: Reading,
    pub recovered: bool,
    pub resolved_alerts: usize,
    pub raised_alerts: usize,
}

#[derive(Clone)]
pub struct ReadingService {
    store: Arc<dyn Store>,
    alerts: AlertManager,
}

impl ReadingService {
    pub fn new(store: Arc<dyn Store>, alerts: AlertManager) -> Self {
        Self { store, alerts }
    }

    /// Accept an externally submitted reading.
    pub async fn ingest(&self, payload: IngestReading) -> Result<Accepted> {
        // ---
        if payload.values.is_empty() {
            return Err(MonitorError::BadRequest(
                "at least one of temperature, salinity, dissolvedOxygen, pH, flowRate, \
                 turbidity is required"
                    .into(),
            ));
        }

        let device = self
            .store
            .get_device(payload.device_id)
            .await?
            .ok_or(MonitorError::DeviceNotFound(payload.device_id))?;

        let reading = Reading {
            id: Uuid::new_v4(),
            device_id: device.id,
            timestamp: payload.timestamp.unwrap_or_else(Utc::now),
            location: payload.location,
            values: payload.values,
            status: ReadingStatus::Normal,
        };

        self.accept(&device, reading, OpenAlerts::ResolveAlways).await
    }

    /// Write `reading` for `device` and run the follow-up effects.
    ///
    /// `device` is the snapshot read before the write; its status decides
    /// whether this is a recovery.
    pub async fn accept(
        &self,
        device: &Device,
        mut reading: Reading,
        open_alerts: OpenAlerts,
    ) -> Result<Accepted> {
        // ---
        self.store.insert_reading(&reading).await?;
        debug!(device_id = %device.id, reading_id = %reading.id, "reading stored");

        let now = Utc::now();
        if self
            .store
            .patch_device(device.id, &DevicePatch::online(now))
            .await?
            .is_none()
        {
            return Err(MonitorError::DeviceNotFound(device.id));
        }

        let recovered = device.status == DeviceStatus::Offline;
        if recovered {
            info!(device_id = %device.id, name = %device.name, "device back online");
            self.alerts.insert(&Alert::recovery(device, now)).await?;
        }

        let resolved_alerts = if recovered || open_alerts == OpenAlerts::ResolveAlways {
            self.alerts
                .resolve_all_for_device(device.id)
                .await?
                .resolved_count
        } else {
            0
        };

        let raised_alerts = self.check_thresholds(&mut reading, now).await;

        Ok(Accepted {
            reading,
            recovered,
            resolved_alerts,
            raised_alerts,
        })
    }

    /// Flag the reading abnormal and raise one alert per breached parameter.
    /// Returns the number of alerts raised.
    async fn check_thresholds(&self, reading: &mut Reading, now: DateTime<Utc>) -> usize {
        // ---
        let breaches = reading.values.breaches();
        if breaches.is_empty() {
            return 0;
        }

        reading.status = ReadingStatus::Abnormal;
        if let Err(err) = self
            .store
            .set_reading_status(reading.id, ReadingStatus::Abnormal)
            .await
        {
            warn!(reading_id = %reading.id, error = %err, "failed to flag reading abnormal");
        }

        let mut raised = 0;
        for breach in &breaches {
            let alert = Alert::from_breach(reading.device_id, breach, now);
            match self.alerts.insert(&alert).await {
                Ok(()) => raised += 1,
                Err(err) => warn!(
                    device_id = %reading.device_id,
                    parameter = %breach.parameter,
                    error = %err,
                    "failed to raise threshold alert"
                ),
            }
        }
        raised
    }

    pub async fn list(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        self.store.list_readings(filter).await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{AlertKind, AlertStatus, Severity};
    use crate::parameters::Parameter;
    use crate::store::{AlertFilter, MemoryStore};
    use crate::test_support::device_at;
    use tokio_test::assert_ok;

    async fn setup(device: &Device) -> (Arc<MemoryStore>, ReadingService) {
        let store = Arc::new(MemoryStore::new());
        store.insert_device(device).await.unwrap();
        let service = ReadingService::new(store.clone(), AlertManager::new(store.clone()));
        (store, service)
    }

    fn payload(device: &Device, values: ParameterValues) -> IngestReading {
        IngestReading {
            device_id: device.id,
            timestamp: None,
            location: device.location.clone(),
            values,
        }
    }

    #[tokio::test]
    async fn breach_marks_reading_abnormal_and_raises_alert() {
        // ---
        let device = device_at(31.23, 121.47);
        let (store, service) = setup(&device).await;

        let accepted = service
            .ingest(payload(
                &device,
                ParameterValues {
                    temperature: Some(33.0),
                    ph: Some(8.1),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        assert_eq!(accepted.reading.status, ReadingStatus::Abnormal);
        assert_eq!(accepted.raised_alerts, 1);

        let stored = store
            .list_readings(&ReadingFilter::default())
            .await
            .unwrap();
        assert_eq!(stored[0].status, ReadingStatus::Abnormal);

        let alerts = store.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].parameter_type, AlertKind::Parameter(Parameter::Temperature));
        assert_eq!(alerts[0].threshold, 30.0);
        assert_eq!(alerts[0].status, AlertStatus::New);
    }

    #[tokio::test]
    async fn ingestion_resolves_previous_alerts_but_keeps_fresh_breach() {
        // ---
        let device = device_at(31.23, 121.47);
        let (store, service) = setup(&device).await;

        assert_ok!(
            service
                .ingest(payload(
                    &device,
                    ParameterValues {
                        salinity: Some(42.0),
                        ..Default::default()
                    },
                ))
                .await
        );
        let accepted = service
            .ingest(payload(
                &device,
                ParameterValues {
                    ph: Some(6.5),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        assert_eq!(accepted.resolved_alerts, 1);

        let open = store
            .list_alerts(&AlertFilter::open_for_device(device.id))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].parameter_type, AlertKind::Parameter(Parameter::Ph));
    }

    #[tokio::test]
    async fn offline_device_recovers_on_ingestion() {
        // ---
        let mut device = device_at(31.23, 121.47);
        device.status = DeviceStatus::Offline;
        let (store, service) = setup(&device).await;

        let alerts = AlertManager::new(store.clone());
        let first = alerts.insert(&Alert::offline(&device, Utc::now())).await;
        assert_ok!(first);

        let accepted = service
            .ingest(payload(
                &device,
                ParameterValues {
                    temperature: Some(18.0),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        assert!(accepted.recovered);
        assert_eq!(accepted.resolved_alerts, 1);

        let stored = store.get_device(device.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeviceStatus::Online);

        let all = store.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|a| a.status == AlertStatus::Resolved));
        assert_eq!(
            all.iter().filter(|a| a.severity == Severity::Info).count(),
            1
        );
    }

    #[tokio::test]
    async fn rejects_empty_and_unknown() {
        // ---
        let device = device_at(31.23, 121.47);
        let (_store, service) = setup(&device).await;

        let empty = service
            .ingest(payload(&device, ParameterValues::default()))
            .await;
        assert!(matches!(empty, Err(MonitorError::BadRequest(_))));

        let mut unknown = payload(
            &device,
            ParameterValues {
                temperature: Some(20.0),
                ..Default::default()
            },
        );
        unknown.device_id = Uuid::new_v4();
        assert!(matches!(
            service.ingest(unknown).await,
            Err(MonitorError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn payload_parses_flat_values() {
        // ---
        let json = serde_json::json!({
            "deviceId": Uuid::nil(),
            "timestamp": "2024-03-01T00:00:00Z",
            "location": { "latitude": 30.5, "longitude": 121.3, "depth": 5.0 },
            "temperature": 18.5,
            "dissolvedOxygen": 6.8
        });
        let parsed: IngestReading = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.values.temperature, Some(18.5));
        assert_eq!(parsed.values.dissolved_oxygen, Some(6.8));
        assert!(parsed.values.ph.is_none());
        assert!(parsed.timestamp.is_some());
    }
}
