use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{AlertFilter, CascadeCounts, ReadingFilter, Store};
use crate::error::{MonitorError, Result};
use crate::models::{
    Alert, AlertId, AlertKind, AlertStatus, Device, DeviceConfig, DeviceId, DevicePatch, Location,
    Reading, ReadingId, ReadingStatus,
};
use crate::parameters::{Parameter, ParameterValues};
use crate::schema;

// ---

/// Postgres-backed store. Enum columns are stored as their wire strings.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, then make sure the schema exists.
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        // ---
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        schema::create_schema(&pool).await?;
        Ok(Self::new(pool))
    }
}

const DEVICE_COLUMNS: &str = "id, name, device_type, latitude, longitude, depth, \
    location_description, status, last_active, battery_level, is_simulating, \
    sample_rate, upload_interval, parameters";

const READING_COLUMNS: &str = "id, device_id, timestamp, latitude, longitude, depth, \
    temperature, salinity, dissolved_oxygen, ph, flow_rate, turbidity, status";

const ALERT_COLUMNS: &str =
    "id, device_id, timestamp, parameter_type, value, threshold, severity, status, message";

#[derive(FromRow)]
struct DeviceRow {
    id: Uuid,
    name: String,
    device_type: String,
    latitude: f64,
    longitude: f64,
    depth: Option<f64>,
    location_description: Option<String>,
    status: String,
    last_active: DateTime<Utc>,
    battery_level: Option<f64>,
    is_simulating: bool,
    sample_rate: i32,
    upload_interval: i32,
    parameters: Vec<String>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = MonitorError;

    fn try_from(row: DeviceRow) -> Result<Self> {
        let parameters = row
            .parameters
            .iter()
            .map(|p| p.parse::<Parameter>().map_err(MonitorError::Store))
            .collect::<Result<Vec<_>>>()?;

        Ok(Device {
            id: row.id,
            name: row.name,
            device_type: row.device_type,
            location: Location {
                latitude: row.latitude,
                longitude: row.longitude,
                depth: row.depth,
                description: row.location_description,
            },
            status: row.status.parse()?,
            last_active: row.last_active,
            battery_level: row.battery_level,
            is_simulating: row.is_simulating,
            config: DeviceConfig {
                sample_rate: row.sample_rate.max(0) as u32,
                upload_interval: row.upload_interval.max(0) as u32,
                parameters,
            },
        })
    }
}

#[derive(FromRow)]
struct ReadingRow {
    id: Uuid,
    device_id: Uuid,
    timestamp: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
    depth: Option<f64>,
    temperature: Option<f64>,
    salinity: Option<f64>,
    dissolved_oxygen: Option<f64>,
    ph: Option<f64>,
    flow_rate: Option<f64>,
    turbidity: Option<f64>,
    status: String,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = MonitorError;

    fn try_from(row: ReadingRow) -> Result<Self> {
        Ok(Reading {
            id: row.id,
            device_id: row.device_id,
            timestamp: row.timestamp,
            location: Location {
                latitude: row.latitude,
                longitude: row.longitude,
                depth: row.depth,
                description: None,
            },
            values: ParameterValues {
                temperature: row.temperature,
                salinity: row.salinity,
                dissolved_oxygen: row.dissolved_oxygen,
                ph: row.ph,
                flow_rate: row.flow_rate,
                turbidity: row.turbidity,
            },
            status: row.status.parse()?,
        })
    }
}

#[derive(FromRow)]
struct AlertRow {
    id: Uuid,
    device_id: Uuid,
    timestamp: DateTime<Utc>,
    parameter_type: String,
    value: f64,
    threshold: f64,
    severity: String,
    status: String,
    message: String,
}

impl TryFrom<AlertRow> for Alert {
    type Error = MonitorError;

    fn try_from(row: AlertRow) -> Result<Self> {
        Ok(Alert {
            id: row.id,
            device_id: row.device_id,
            timestamp: row.timestamp,
            parameter_type: AlertKind::try_from(row.parameter_type).map_err(MonitorError::Store)?,
            value: row.value,
            threshold: row.threshold,
            severity: row.severity.parse()?,
            status: row.status.parse()?,
            message: row.message,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = MonitorError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn to_limit(limit: Option<usize>) -> Option<i64> {
    limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX))
}

#[async_trait]
impl Store for PgStore {
    async fn insert_device(&self, device: &Device) -> Result<()> {
        // ---
        let parameters: Vec<String> = device
            .config
            .parameters
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();

        sqlx::query(&format!(
            "INSERT INTO devices ({DEVICE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(device.id)
        .bind(&device.name)
        .bind(&device.device_type)
        .bind(device.location.latitude)
        .bind(device.location.longitude)
        .bind(device.location.depth)
        .bind(&device.location.description)
        .bind(device.status.as_str())
        .bind(device.last_active)
        .bind(device.battery_level)
        .bind(device.is_simulating)
        .bind(device.config.sample_rate as i32)
        .bind(device.config.upload_interval as i32)
        .bind(&parameters)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>> {
        let row: Option<DeviceRow> =
            sqlx::query_as(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Device::try_from).transpose()
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let rows: Vec<DeviceRow> =
            sqlx::query_as(&format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        convert_all(rows)
    }

    async fn update_device(&self, device: &Device) -> Result<bool> {
        // ---
        let parameters: Vec<String> = device
            .config
            .parameters
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE devices SET
                name = $2,
                device_type = $3,
                latitude = $4,
                longitude = $5,
                depth = $6,
                location_description = $7,
                sample_rate = $8,
                upload_interval = $9,
                parameters = $10
            WHERE id = $1
            "#,
        )
        .bind(device.id)
        .bind(&device.name)
        .bind(&device.device_type)
        .bind(device.location.latitude)
        .bind(device.location.longitude)
        .bind(device.location.depth)
        .bind(&device.location.description)
        .bind(device.config.sample_rate as i32)
        .bind(device.config.upload_interval as i32)
        .bind(&parameters)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn patch_device(&self, id: DeviceId, patch: &DevicePatch) -> Result<Option<Device>> {
        // ---
        let row: Option<DeviceRow> = sqlx::query_as(&format!(
            r#"
            UPDATE devices SET
                status = COALESCE($2, status),
                last_active = COALESCE($3, last_active),
                is_simulating = COALESCE($4, is_simulating),
                battery_level = COALESCE($5, battery_level)
            WHERE id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.last_active)
        .bind(patch.is_simulating)
        .bind(patch.battery_level)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Device::try_from).transpose()
    }

    async fn delete_device(&self, id: DeviceId) -> Result<Option<CascadeCounts>> {
        // ---
        let mut tx = self.pool.begin().await?;

        let deleted_readings = sqlx::query("DELETE FROM readings WHERE device_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let deleted_alerts = sqlx::query("DELETE FROM alerts WHERE device_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let deleted_devices = sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted_devices == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(CascadeCounts {
            deleted_readings,
            deleted_alerts,
        }))
    }

    async fn insert_reading(&self, reading: &Reading) -> Result<()> {
        // ---
        let values = &reading.values;
        sqlx::query(&format!(
            "INSERT INTO readings ({READING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(reading.id)
        .bind(reading.device_id)
        .bind(reading.timestamp)
        .bind(reading.location.latitude)
        .bind(reading.location.longitude)
        .bind(reading.location.depth)
        .bind(values.temperature)
        .bind(values.salinity)
        .bind(values.dissolved_oxygen)
        .bind(values.ph)
        .bind(values.flow_rate)
        .bind(values.turbidity)
        .bind(reading.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                MonitorError::DeviceNotFound(reading.device_id)
            }
            other => other.into(),
        })?;

        Ok(())
    }

    async fn set_reading_status(&self, id: ReadingId, status: ReadingStatus) -> Result<()> {
        sqlx::query("UPDATE readings SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_readings(&self, device_id: DeviceId, limit: usize) -> Result<Vec<Reading>> {
        let rows: Vec<ReadingRow> = sqlx::query_as(&format!(
            "SELECT {READING_COLUMNS} FROM readings \
             WHERE device_id = $1 ORDER BY timestamp DESC LIMIT $2"
        ))
        .bind(device_id)
        .bind(to_limit(Some(limit)))
        .fetch_all(&self.pool)
        .await?;

        let mut readings: Vec<Reading> = convert_all(rows)?;
        readings.reverse();
        Ok(readings)
    }

    async fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        let rows: Vec<ReadingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {READING_COLUMNS} FROM readings
            WHERE ($1::uuid IS NULL OR device_id = $1)
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
              AND ($3::timestamptz IS NULL OR timestamp <= $3)
            ORDER BY timestamp DESC
            LIMIT $4
            "#
        ))
        .bind(filter.device_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(to_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn count_readings(&self, filter: &ReadingFilter) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM readings
            WHERE ($1::uuid IS NULL OR device_id = $1)
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
              AND ($3::timestamptz IS NULL OR timestamp <= $3)
            "#,
        )
        .bind(filter.device_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_readings_since(
        &self,
        device_id: DeviceId,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM readings WHERE device_id = $1 AND timestamp >= $2",
        )
        .bind(device_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO alerts ({ALERT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(alert.id)
        .bind(alert.device_id)
        .bind(alert.timestamp)
        .bind(alert.parameter_type.as_str())
        .bind(alert.value)
        .bind(alert.threshold)
        .bind(alert.severity.as_str())
        .bind(alert.status.as_str())
        .bind(&alert.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>> {
        let row: Option<AlertRow> =
            sqlx::query_as(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn set_alert_status(
        &self,
        id: AlertId,
        from: &[AlertStatus],
        to: AlertStatus,
    ) -> Result<Option<Alert>> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let row: Option<AlertRow> = sqlx::query_as(&format!(
            "UPDATE alerts SET status = $2 WHERE id = $1 AND status = ANY($3) \
             RETURNING {ALERT_COLUMNS}"
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(&from)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let statuses: Option<Vec<String>> = (!filter.statuses.is_empty())
            .then(|| filter.statuses.iter().map(|s| s.as_str().to_string()).collect());

        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ALERT_COLUMNS} FROM alerts
            WHERE ($1::uuid IS NULL OR device_id = $1)
              AND ($2::text[] IS NULL OR status = ANY($2))
            ORDER BY timestamp DESC
            LIMIT $3
            "#
        ))
        .bind(filter.device_id)
        .bind(statuses)
        .bind(to_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }
}
