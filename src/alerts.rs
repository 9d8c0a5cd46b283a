//! Alert lifecycle manager.
//!
//! The only mutation surface for alert records. Ingestion, the simulation
//! scheduler, the liveness monitor and interactive HTTP actions all go
//! through here, so every status change passes the same forward-only check.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MonitorError, Result};
use crate::models::{Alert, AlertId, AlertKind, AlertStatus, DeviceId, Severity};
use crate::store::{AlertFilter, Store};

// ---

/// Outcome of [`AlertManager::resolve_all_for_device`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResolution {
    pub device_id: DeviceId,
    pub resolved_count: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub id: AlertId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateResult {
    pub message: String,
    pub results: Vec<BatchItemResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    pub device_id: DeviceId,
    pub parameter_type: AlertKind,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_parameter: BTreeMap<String, usize>,
    pub recent_alerts: Vec<Alert>,
}

const RECENT_IN_SUMMARY: usize = 5;

#[derive(Clone)]
pub struct AlertManager {
    store: Arc<dyn Store>,
}

impl AlertManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create an alert in status `new`.
    pub async fn create(&self, new: NewAlert) -> Result<Alert> {
        let alert = Alert::new(
            new.device_id,
            new.parameter_type,
            new.value,
            new.threshold,
            new.severity,
            new.message,
            Utc::now(),
        );
        self.insert(&alert).await?;
        Ok(alert)
    }

    /// Store a fully built alert (offline, recovery and breach alerts).
    pub async fn insert(&self, alert: &Alert) -> Result<()> {
        self.store.insert_alert(alert).await?;
        info!(
            alert_id = %alert.id,
            device_id = %alert.device_id,
            parameter = %alert.parameter_type,
            severity = %alert.severity,
            status = %alert.status,
            "alert recorded"
        );
        Ok(())
    }

    pub async fn acknowledge(&self, id: AlertId) -> Result<Alert> {
        self.transition(id, AlertStatus::Acknowledged).await
    }

    pub async fn resolve(&self, id: AlertId) -> Result<Alert> {
        self.transition(id, AlertStatus::Resolved).await
    }

    async fn transition(&self, id: AlertId, next: AlertStatus) -> Result<Alert> {
        // ---
        let current = self.get(id).await?;
        current.status.transition_to(next)?;

        // The status check above may be stale by now; the store applies the
        // move only if the alert is still in a legal source status.
        match self
            .store
            .set_alert_status(id, AlertStatus::sources(next), next)
            .await?
        {
            Some(alert) => {
                debug!(alert_id = %id, from = %current.status, to = %next, "alert transitioned");
                Ok(alert)
            }
            None => {
                let now = self.get(id).await?;
                debug!(
                    alert_id = %id,
                    status = %now.status,
                    to = %next,
                    "alert changed before transition applied"
                );
                Err(MonitorError::InvalidTransition {
                    from: now.status,
                    to: next,
                })
            }
        }
    }

    /// Resolve every open (`new` or `acknowledged`) alert of a device.
    ///
    /// Calling it with nothing open is a no-op returning a count of 0.
    pub async fn resolve_all_for_device(&self, device_id: DeviceId) -> Result<BulkResolution> {
        // ---
        let open = self
            .store
            .list_alerts(&AlertFilter::open_for_device(device_id))
            .await?;

        let open_statuses = AlertStatus::sources(AlertStatus::Resolved);
        let mut resolved_count = 0;
        for alert in &open {
            // Skips alerts another caller moved on since the listing
            let resolved = self
                .store
                .set_alert_status(alert.id, open_statuses, AlertStatus::Resolved)
                .await?;
            if resolved.is_some() {
                resolved_count += 1;
            }
        }

        if resolved_count > 0 {
            info!(device_id = %device_id, resolved_count, "resolved open alerts");
        }

        Ok(BulkResolution {
            device_id,
            resolved_count,
            message: format!("Resolved {resolved_count} open alerts for device {device_id}"),
        })
    }

    /// Move each alert to `status`, collecting a result per id.
    pub async fn batch_update_status(
        &self,
        ids: &[AlertId],
        status: AlertStatus,
    ) -> BatchUpdateResult {
        // ---
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            let outcome = self.transition(id, status).await;
            results.push(BatchItemResult {
                id,
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            });
        }

        let updated = results.iter().filter(|r| r.success).count();
        BatchUpdateResult {
            message: format!("Updated {updated} of {} alerts", ids.len()),
            results,
        }
    }

    pub async fn get(&self, id: AlertId) -> Result<Alert> {
        self.store
            .get_alert(id)
            .await?
            .ok_or(MonitorError::AlertNotFound(id))
    }

    pub async fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        self.store.list_alerts(filter).await
    }

    pub async fn summary(&self) -> Result<AlertSummary> {
        // ---
        let alerts = self.store.list_alerts(&AlertFilter::default()).await?;

        let mut summary = AlertSummary {
            total: alerts.len(),
            ..Default::default()
        };
        for status in [AlertStatus::New, AlertStatus::Acknowledged, AlertStatus::Resolved] {
            summary.by_status.insert(status.to_string(), 0);
        }
        for severity in [Severity::Low, Severity::Medium, Severity::High, Severity::Info] {
            summary.by_severity.insert(severity.to_string(), 0);
        }

        for alert in &alerts {
            *summary.by_status.entry(alert.status.to_string()).or_default() += 1;
            *summary.by_severity.entry(alert.severity.to_string()).or_default() += 1;
            *summary
                .by_parameter
                .entry(alert.parameter_type.to_string())
                .or_default() += 1;
        }

        // Store returns newest first
        summary.recent_alerts = alerts.into_iter().take(RECENT_IN_SUMMARY).collect();
        Ok(summary)
    }
}
