//! Records for devices, readings and alerts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MonitorError;
use crate::parameters::{Breach, Parameter, ParameterValues};

// ---

pub type DeviceId = Uuid;
pub type ReadingId = Uuid;
pub type AlertId = Uuid;

/// Sentinel parameter type for liveness alerts.
pub const DEVICE_STATUS: &str = "device_status";

/// Implements `as_str`, `Display` and `FromStr` for a unit-only enum.
macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = MonitorError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(MonitorError::BadRequest(format!(
                        "invalid {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Maintenance,
}

string_enum!(DeviceStatus {
    Online => "online",
    Offline => "offline",
    Maintenance => "maintenance",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Normal,
    Abnormal,
}

string_enum!(ReadingStatus {
    Normal => "normal",
    Abnormal => "abnormal",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Info,
}

string_enum!(Severity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Info => "info",
});

/// Alert lifecycle: `new -> acknowledged -> resolved`, or `new -> resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    New,
    Acknowledged,
    Resolved,
}

string_enum!(AlertStatus {
    New => "new",
    Acknowledged => "acknowledged",
    Resolved => "resolved",
});

impl AlertStatus {
    /// Open alerts are the ones bulk resolution picks up.
    pub const fn is_open(self) -> bool {
        matches!(self, AlertStatus::New | AlertStatus::Acknowledged)
    }

    /// Validate a forward transition.
    pub fn transition_to(self, next: AlertStatus) -> Result<AlertStatus, MonitorError> {
        use AlertStatus::*;
        match (self, next) {
            (New, Acknowledged) | (New, Resolved) | (Acknowledged, Resolved) => Ok(next),
            (from, to) => Err(MonitorError::InvalidTransition { from, to }),
        }
    }

    /// Statuses an alert may be in for a move to `next` to be legal.
    pub const fn sources(next: AlertStatus) -> &'static [AlertStatus] {
        use AlertStatus::*;
        match next {
            New => &[],
            Acknowledged => &[New],
            Resolved => &[New, Acknowledged],
        }
    }
}

/// What an alert is about: a sensor parameter or the device's liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AlertKind {
    Parameter(Parameter),
    DeviceStatus,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Parameter(p) => p.as_str(),
            AlertKind::DeviceStatus => DEVICE_STATUS,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AlertKind> for String {
    fn from(kind: AlertKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TryFrom<String> for AlertKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == DEVICE_STATUS {
            Ok(AlertKind::DeviceStatus)
        } else {
            value.parse().map(AlertKind::Parameter)
        }
    }
}

/// Geographic position of a device or reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Minutes between samples.
    pub sample_rate: u32,
    /// Minutes between uploads.
    pub upload_interval: u32,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub location: Location,
    pub status: DeviceStatus,
    pub last_active: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub is_simulating: bool,
    pub config: DeviceConfig,
}

/// Registration / full-update payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDevice {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub location: Location,
    pub config: DeviceConfig,
    #[serde(default)]
    pub battery_level: Option<f64>,
}

impl NewDevice {
    pub fn into_device(self, id: DeviceId, now: DateTime<Utc>) -> Device {
        Device {
            id,
            name: self.name,
            device_type: self.device_type,
            location: self.location,
            status: DeviceStatus::Online,
            last_active: now,
            battery_level: self.battery_level,
            is_simulating: false,
            config: self.config,
        }
    }
}

/// Partial update of the mutable liveness fields. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePatch {
    pub status: Option<DeviceStatus>,
    pub last_active: Option<DateTime<Utc>>,
    pub is_simulating: Option<bool>,
    pub battery_level: Option<f64>,
}

impl DevicePatch {
    pub fn online(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(DeviceStatus::Online),
            last_active: Some(now),
            ..Default::default()
        }
    }

    pub fn apply(&self, device: &mut Device) {
        if let Some(status) = self.status {
            device.status = status;
        }
        if let Some(last_active) = self.last_active {
            device.last_active = last_active;
        }
        if let Some(is_simulating) = self.is_simulating {
            device.is_simulating = is_simulating;
        }
        if let Some(battery_level) = self.battery_level {
            device.battery_level = Some(battery_level);
        }
    }
}

/// One timestamped set of sensor values. Immutable apart from `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: ReadingId,
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    #[serde(flatten)]
    pub values: ParameterValues,
    pub status: ReadingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub parameter_type: AlertKind,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub status: AlertStatus,
    pub message: String,
}

impl Alert {
    pub fn new(
        device_id: DeviceId,
        parameter_type: AlertKind,
        value: f64,
        threshold: f64,
        severity: Severity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            timestamp,
            parameter_type,
            value,
            threshold,
            severity,
            status: AlertStatus::New,
            message: message.into(),
        }
    }

    /// Raised by the liveness monitor on `online -> offline`.
    pub fn offline(device: &Device, now: DateTime<Utc>) -> Self {
        let message = format!(
            "Device {} ({}) went offline, last active at {}",
            device.name,
            device.id,
            device.last_active.to_rfc3339()
        );
        Self::new(
            device.id,
            AlertKind::DeviceStatus,
            0.0,
            1.0,
            Severity::High,
            message,
            now,
        )
    }

    /// Audit record for `offline -> online`; created already resolved.
    pub fn recovery(device: &Device, now: DateTime<Utc>) -> Self {
        let message = format!("Device {} ({}) is back online", device.name, device.id);
        let mut alert = Self::new(
            device.id,
            AlertKind::DeviceStatus,
            1.0,
            0.0,
            Severity::Info,
            message,
            now,
        );
        alert.status = AlertStatus::Resolved;
        alert
    }

    pub fn from_breach(device_id: DeviceId, breach: &Breach, now: DateTime<Utc>) -> Self {
        let message = format!(
            "{} value {:.2} {} is {} threshold {}",
            breach.parameter,
            breach.value,
            breach.parameter.unit(),
            if breach.above { "above" } else { "below" },
            breach.threshold
        );
        Self::new(
            device_id,
            AlertKind::Parameter(breach.parameter),
            breach.value,
            breach.threshold,
            Severity::High,
            message,
            now,
        )
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn alert_transitions_are_forward_only() {
        // ---
        use AlertStatus::*;

        assert_eq!(New.transition_to(Acknowledged).unwrap(), Acknowledged);
        assert_eq!(New.transition_to(Resolved).unwrap(), Resolved);
        assert_eq!(Acknowledged.transition_to(Resolved).unwrap(), Resolved);

        for (from, to) in [
            (Resolved, Resolved),
            (Resolved, Acknowledged),
            (Resolved, New),
            (Acknowledged, Acknowledged),
            (Acknowledged, New),
            (New, New),
        ] {
            let err = from.transition_to(to).unwrap_err();
            assert!(matches!(err, MonitorError::InvalidTransition { .. }), "{from} -> {to}");
        }
    }

    #[test]
    fn sources_agree_with_transition_check() {
        // ---
        use AlertStatus::*;

        for next in [New, Acknowledged, Resolved] {
            for from in [New, Acknowledged, Resolved] {
                let legal = from.transition_to(next).is_ok();
                assert_eq!(AlertStatus::sources(next).contains(&from), legal, "{from} -> {next}");
            }
        }
    }

    #[test]
    fn alert_kind_uses_sentinel_for_liveness() {
        // ---
        let json = serde_json::to_string(&AlertKind::DeviceStatus).unwrap();
        assert_eq!(json, "\"device_status\"");

        let kind: AlertKind = serde_json::from_str("\"dissolvedOxygen\"").unwrap();
        assert_eq!(kind, AlertKind::Parameter(Parameter::DissolvedOxygen));

        assert!(serde_json::from_str::<AlertKind>("\"humidity\"").is_err());
    }

    #[test]
    fn recovery_alert_is_resolved_info() {
        // ---
        let now = Utc::now();
        let device = NewDevice {
            name: "Buoy A1".into(),
            device_type: "buoy".into(),
            location: Location {
                latitude: 31.23,
                longitude: 121.47,
                depth: None,
                description: None,
            },
            config: DeviceConfig {
                sample_rate: 15,
                upload_interval: 60,
                parameters: vec![Parameter::Temperature],
            },
            battery_level: None,
        }
        .into_device(Uuid::new_v4(), now);

        let alert = Alert::recovery(&device, now);
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert_eq!(alert.severity, Severity::Info);
        assert_eq!(alert.parameter_type, AlertKind::DeviceStatus);
        assert_eq!((alert.value, alert.threshold), (1.0, 0.0));

        let offline = Alert::offline(&device, now);
        assert_eq!(offline.status, AlertStatus::New);
        assert_eq!(offline.severity, Severity::High);
        assert!(offline.message.contains("Buoy A1"));
    }

    #[test]
    fn reading_values_flatten_into_record() {
        // ---
        let reading = Reading {
            id: Uuid::nil(),
            device_id: Uuid::nil(),
            timestamp: Utc::now(),
            location: Location {
                latitude: 1.0,
                longitude: 2.0,
                depth: Some(5.0),
                description: None,
            },
            values: ParameterValues {
                ph: Some(8.05),
                ..Default::default()
            },
            status: ReadingStatus::Normal,
        };
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["pH"], 8.05);
        assert_eq!(json["status"], "normal");
        assert!(json.get("temperature").is_none());
    }
}
