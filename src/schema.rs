//! Database schema management for `wifi-diagnosis`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// `f_sensors` is populated by the external registration process; the
/// pipeline only reads it. `f_sensor_readings` is append-only apart from the
/// drop-rate backfill, and `f_diagnosis_results` holds at most one row per
/// reading.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS f_sensors (
            sensor_id      BIGSERIAL PRIMARY KEY,
            ap_mac_address TEXT NOT NULL UNIQUE,
            location       TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS f_sensor_readings (
            reading_id      BIGSERIAL PRIMARY KEY,
            sensor_id       BIGINT           NOT NULL REFERENCES f_sensors (sensor_id),
            timestamp       TIMESTAMP        NOT NULL,
            rssi            DOUBLE PRECISION NOT NULL,
            ping            DOUBLE PRECISION NOT NULL,
            speed           DOUBLE PRECISION NOT NULL,
            ping_timeout    BOOLEAN          NOT NULL,
            speed_drop_rate DOUBLE PRECISION
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS f_diagnosis_results (
            diagnosis_id BIGSERIAL PRIMARY KEY,
            reading_id   BIGINT      NOT NULL UNIQUE
                         REFERENCES f_sensor_readings (reading_id) ON DELETE CASCADE,
            problem_type TEXT        NOT NULL,
            diagnosed_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Prior-reading lookup and the recent-readings listing
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_sensor_ts
            ON f_sensor_readings (sensor_id, timestamp DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_ts
            ON f_sensor_readings (timestamp DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Recompute scan
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_pending_drop_rate
            ON f_sensor_readings (sensor_id, timestamp)
            WHERE speed_drop_rate IS NULL;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
