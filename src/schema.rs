//! Database schema management for `ocean-monitor`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup when the Postgres store is selected.

use sqlx::PgPool;

use crate::error::Result;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `devices`, `readings` and `alerts` tables. Readings and alerts
/// reference their device with `ON DELETE CASCADE`, so removing a device also
/// removes its history. Safe to call on every startup.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id                   UUID PRIMARY KEY,
            name                 TEXT             NOT NULL,
            device_type          TEXT             NOT NULL,
            latitude             DOUBLE PRECISION NOT NULL,
            longitude            DOUBLE PRECISION NOT NULL,
            depth                DOUBLE PRECISION,
            location_description TEXT,
            status               TEXT             NOT NULL,
            last_active          TIMESTAMPTZ      NOT NULL,
            battery_level        DOUBLE PRECISION,
            is_simulating        BOOLEAN          NOT NULL DEFAULT FALSE,
            sample_rate          INTEGER          NOT NULL,
            upload_interval      INTEGER          NOT NULL,
            parameters           TEXT[]           NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Append-only time series; only `status` is ever updated
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id               UUID PRIMARY KEY,
            device_id        UUID             NOT NULL REFERENCES devices (id) ON DELETE CASCADE,
            timestamp        TIMESTAMPTZ      NOT NULL,
            latitude         DOUBLE PRECISION NOT NULL,
            longitude        DOUBLE PRECISION NOT NULL,
            depth            DOUBLE PRECISION,
            temperature      DOUBLE PRECISION,
            salinity         DOUBLE PRECISION,
            dissolved_oxygen DOUBLE PRECISION,
            ph               DOUBLE PRECISION,
            flow_rate        DOUBLE PRECISION,
            turbidity        DOUBLE PRECISION,
            status           TEXT             NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id             UUID PRIMARY KEY,
            device_id      UUID             NOT NULL REFERENCES devices (id) ON DELETE CASCADE,
            timestamp      TIMESTAMPTZ      NOT NULL,
            parameter_type TEXT             NOT NULL,
            value          DOUBLE PRECISION NOT NULL,
            threshold      DOUBLE PRECISION NOT NULL,
            severity       TEXT             NOT NULL,
            status         TEXT             NOT NULL,
            message        TEXT             NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_device_timestamp
            ON readings (device_id, timestamp DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alerts_device_status
            ON alerts (device_id, status);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alerts_timestamp
            ON alerts (timestamp DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
