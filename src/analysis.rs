//! Read-side analytics over stored readings and alerts, plus the z-score
//! anomaly sweep that feeds the alert lifecycle.
//!
//! All figures use population statistics. Trend classification fits a
//! least-squares line through the time-ordered values against their index.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::alerts::AlertManager;
use crate::error::{MonitorError, Result};
use crate::models::{Alert, AlertKind, DeviceId, Location, Reading, Severity};
use crate::parameters::Parameter;
use crate::store::{AlertFilter, ReadingFilter, Store};

// ---

/// Longest window accepted by the per-day and per-hour aggregations.
pub const MAX_TREND_DAYS: u32 = 365;

/// Slope, in parameter units per reading, below which a series is stable.
const TREND_SLOPE: f64 = 0.05;
const TREND_MIN_POINTS: usize = 3;

const ANOMALY_MIN_POINTS: usize = 5;
/// Only this many of the newest readings per device are checked.
const ANOMALY_RECENT_POINTS: usize = 5;
const ANOMALY_Z_LIMIT: f64 = 3.0;
pub const DEFAULT_LOOKBACK_HOURS: u32 = 24;

/// Flow rate is left out; it has no meaningful baseline.
const ANOMALY_PARAMETERS: [Parameter; 5] = [
    Parameter::Temperature,
    Parameter::Salinity,
    Parameter::DissolvedOxygen,
    Parameter::Ph,
    Parameter::Turbidity,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterStatistics {
    pub parameter: Parameter,
    pub count: usize,
    /// Absent when there are no values in the window.
    #[serde(flatten)]
    pub summary: Option<Summary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub standard_deviation: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAlerts {
    pub date: String,
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_readings: u64,
    pub readings_last_24h: u64,
    /// Last 24 h minus the 24 h before.
    pub readings_growth: i64,
    /// Per-parameter mean over the last 24 h; parameters without values
    /// are omitted.
    pub averages: BTreeMap<Parameter, f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyBucket {
    pub timestamp: DateTime<Utc>,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalousValue {
    pub parameter: Parameter,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// Signed z-score.
    pub deviation: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub timestamp: DateTime<Utc>,
    pub device_id: DeviceId,
    pub location: Location,
    pub values: Vec<AnomalousValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub anomalies: Vec<Anomaly>,
    pub alerts_raised: usize,
    pub message: String,
}

/// Mean and population standard deviation. `values` must not be empty.
fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Classify time-ordered `values` by the slope of their regression line.
pub fn trend(values: &[f64]) -> Trend {
    // ---
    if values.len() < TREND_MIN_POINTS {
        return Trend::InsufficientData;
    }

    let n = values.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_xx - sum_x * sum_x);

    if slope > TREND_SLOPE {
        Trend::Increasing
    } else if slope < -TREND_SLOPE {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Severity from the size of a z-score.
fn anomaly_severity(deviation: f64) -> Severity {
    match deviation.abs() {
        d if d > 5.0 => Severity::High,
        d if d > 4.0 => Severity::Medium,
        _ => Severity::Low,
    }
}

fn values_of(readings: &[Reading], parameter: Parameter) -> Vec<f64> {
    readings.iter().filter_map(|r| r.values.get(parameter)).collect()
}

fn check_days(days: u32) -> Result<()> {
    if days == 0 || days > MAX_TREND_DAYS {
        return Err(MonitorError::BadRequest(format!(
            "days must be between 1 and {MAX_TREND_DAYS}, got {days}"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct AnalysisService {
    store: Arc<dyn Store>,
    alerts: AlertManager,
}

impl AnalysisService {
    pub fn new(store: Arc<dyn Store>, alerts: AlertManager) -> Self {
        Self { store, alerts }
    }

    /// Count, mean, extremes, spread and trend of one parameter in
    /// `[from, to]`, optionally for a single device.
    pub async fn statistics(
        &self,
        parameter: Parameter,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        device_id: Option<DeviceId>,
    ) -> Result<ParameterStatistics> {
        // ---
        let mut readings = self
            .store
            .list_readings(&ReadingFilter {
                device_id,
                from,
                to,
                limit: None,
            })
            .await?;
        readings.sort_by_key(|r| r.timestamp);

        let values = values_of(&readings, parameter);
        let summary = (!values.is_empty()).then(|| {
            let (average, standard_deviation) = mean_and_std_dev(&values);
            Summary {
                average,
                minimum: values.iter().copied().fold(f64::INFINITY, f64::min),
                maximum: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                standard_deviation,
                trend: trend(&values),
            }
        });

        Ok(ParameterStatistics {
            parameter,
            count: values.len(),
            summary,
        })
    }

    /// Alert counts per consecutive 24 h window over the `days` days ending
    /// now, oldest first.
    pub async fn alert_trends(&self, days: u32) -> Result<Vec<DailyAlerts>> {
        // ---
        check_days(days)?;
        let start = Utc::now() - Duration::days(i64::from(days));
        let alerts = self.store.list_alerts(&AlertFilter::default()).await?;

        let trends = (0..days)
            .map(|day| {
                let day_start = start + Duration::days(i64::from(day));
                let day_end = day_start + Duration::days(1);
                let in_day: Vec<&Alert> = alerts
                    .iter()
                    .filter(|a| a.timestamp >= day_start && a.timestamp < day_end)
                    .collect();
                let with = |severity: Severity| {
                    in_day.iter().filter(|a| a.severity == severity).count()
                };

                DailyAlerts {
                    date: day_start.date_naive().to_string(),
                    timestamp: day_start,
                    total: in_day.len(),
                    high: with(Severity::High),
                    medium: with(Severity::Medium),
                    low: with(Severity::Low),
                }
            })
            .collect();
        Ok(trends)
    }

    /// Headline numbers for the overview screen.
    pub async fn dashboard(&self) -> Result<DashboardStats> {
        // ---
        let now = Utc::now();
        let day_ago = now - Duration::days(1);

        let total_readings = self.store.count_readings(&ReadingFilter::default()).await?;
        let recent = self
            .store
            .list_readings(&ReadingFilter {
                from: Some(day_ago),
                ..Default::default()
            })
            .await?;
        let previous_day = self
            .store
            .count_readings(&ReadingFilter {
                from: Some(day_ago - Duration::days(1)),
                to: Some(day_ago - Duration::milliseconds(1)),
                ..Default::default()
            })
            .await?;
        let newest = self
            .store
            .list_readings(&ReadingFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await?;

        let averages = Parameter::ALL
            .into_iter()
            .filter_map(|parameter| {
                let values = values_of(&recent, parameter);
                (!values.is_empty()).then(|| (parameter, mean_and_std_dev(&values).0))
            })
            .collect();

        let readings_last_24h = recent.len() as u64;
        Ok(DashboardStats {
            total_readings,
            readings_last_24h,
            readings_growth: readings_last_24h as i64 - previous_day as i64,
            averages,
            last_updated: newest.first().map(|r| r.timestamp),
        })
    }

    /// Per-hour mean, extremes and count of `parameter` over the last
    /// `days` days, oldest hour first. Hours without values are skipped.
    pub async fn hourly_trends(
        &self,
        parameter: Parameter,
        days: u32,
    ) -> Result<Vec<HourlyBucket>> {
        // ---
        check_days(days)?;
        let readings = self
            .store
            .list_readings(&ReadingFilter {
                from: Some(Utc::now() - Duration::days(i64::from(days))),
                ..Default::default()
            })
            .await?;

        let mut hours: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
        for reading in &readings {
            if let Some(value) = reading.values.get(parameter) {
                let hour = reading
                    .timestamp
                    .duration_trunc(Duration::hours(1))
                    .unwrap_or(reading.timestamp);
                hours.entry(hour).or_default().push(value);
            }
        }

        Ok(hours
            .into_iter()
            .map(|(timestamp, values)| HourlyBucket {
                timestamp,
                average: mean_and_std_dev(&values).0,
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                count: values.len(),
            })
            .collect())
    }

    /// Flag values more than three standard deviations from their device's
    /// mean over the lookback window, among each device's newest readings,
    /// and raise an alert for each unless an open one for the same device
    /// and parameter was raised in the last two hours.
    pub async fn detect_anomalies(
        &self,
        device_id: Option<DeviceId>,
        lookback_hours: u32,
    ) -> Result<AnomalyReport> {
        // ---
        let now = Utc::now();
        let readings = self
            .store
            .list_readings(&ReadingFilter {
                device_id,
                from: Some(now - Duration::hours(i64::from(lookback_hours))),
                to: Some(now),
                limit: None,
            })
            .await?;

        if readings.len() < ANOMALY_MIN_POINTS {
            return Ok(AnomalyReport {
                anomalies: Vec::new(),
                alerts_raised: 0,
                message: "Not enough data for anomaly detection".into(),
            });
        }

        let mut by_device: HashMap<DeviceId, Vec<Reading>> = HashMap::new();
        for reading in readings {
            by_device.entry(reading.device_id).or_default().push(reading);
        }

        let mut anomalies = Vec::new();
        for mut series in by_device.into_values() {
            series.sort_by_key(|r| r.timestamp);
            anomalies.extend(find_anomalies(&series));
        }
        anomalies.sort_by_key(|a| a.timestamp);

        let mut alerts_raised = 0;
        for anomaly in &anomalies {
            for value in &anomaly.values {
                if self.raise_unless_recent(anomaly, value, now).await? {
                    alerts_raised += 1;
                }
            }
        }

        if !anomalies.is_empty() {
            info!(anomalies = anomalies.len(), alerts_raised, "anomaly sweep finished");
        }
        Ok(AnomalyReport {
            message: format!("Detected {} anomalies", anomalies.len()),
            anomalies,
            alerts_raised,
        })
    }

    async fn raise_unless_recent(
        &self,
        anomaly: &Anomaly,
        value: &AnomalousValue,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // ---
        let kind = AlertKind::Parameter(value.parameter);
        let recent_cutoff = now - Duration::hours(2);
        let open = self
            .alerts
            .list(&AlertFilter::open_for_device(anomaly.device_id))
            .await?;
        if open
            .iter()
            .any(|a| a.parameter_type == kind && a.timestamp >= recent_cutoff)
        {
            debug!(
                device_id = %anomaly.device_id,
                parameter = %value.parameter,
                "anomaly already alerted"
            );
            return Ok(false);
        }

        let above = value.value > value.mean;
        let threshold = if above {
            value.mean + ANOMALY_Z_LIMIT * value.std_dev
        } else {
            value.mean - ANOMALY_Z_LIMIT * value.std_dev
        };
        let message = format!(
            "{} anomaly: {:.2} is {} the normal {:.2} by {:.1} standard deviations",
            value.parameter,
            value.value,
            if above { "above" } else { "below" },
            value.mean,
            value.deviation.abs()
        );
        let alert = Alert::new(
            anomaly.device_id,
            kind,
            value.value,
            threshold,
            anomaly_severity(value.deviation),
            message,
            anomaly.timestamp,
        );
        self.alerts.insert(&alert).await?;
        Ok(true)
    }
}

/// Anomalies among the newest readings of one device's time-ordered series.
fn find_anomalies(series: &[Reading]) -> Vec<Anomaly> {
    // ---
    let baselines: Vec<(Parameter, f64, f64)> = ANOMALY_PARAMETERS
        .into_iter()
        .filter_map(|parameter| {
            let values = values_of(series, parameter);
            (values.len() >= ANOMALY_MIN_POINTS).then(|| {
                let (mean, std_dev) = mean_and_std_dev(&values);
                (parameter, mean, std_dev)
            })
        })
        .collect();

    let recent = &series[series.len().saturating_sub(ANOMALY_RECENT_POINTS)..];
    recent
        .iter()
        .filter_map(|reading| {
            let values: Vec<AnomalousValue> = baselines
                .iter()
                .filter_map(|&(parameter, mean, std_dev)| {
                    let value = reading.values.get(parameter)?;
                    ((value - mean).abs() > ANOMALY_Z_LIMIT * std_dev).then(|| AnomalousValue {
                        parameter,
                        value,
                        mean,
                        std_dev,
                        deviation: (value - mean) / std_dev,
                    })
                })
                .collect();
            (!values.is_empty()).then(|| Anomaly {
                timestamp: reading.timestamp,
                device_id: reading.device_id,
                location: reading.location.clone(),
                values,
            })
        })
        .collect()
}
