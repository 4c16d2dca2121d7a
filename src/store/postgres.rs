//! PostgreSQL-backed store.
//!
//! Every call runs as its own auto-committed statement on the pool, so an
//! inserted reading is durable and visible before the next record's
//! prior-reading lookup starts.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::PgPool;

use super::{DiagnosisStore, ReadingStore, SensorDirectory, StoreError};
use crate::models::{Diagnosis, NewReading, Reading, ReadingView, Sensor};

// ---

const READING_COLUMNS: &str =
    "reading_id, sensor_id, timestamp, rssi, ping, speed, ping_timeout, speed_drop_rate";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SensorDirectory for PgStore {
    async fn resolve(&self, mac_address: &str) -> Result<Option<Sensor>, StoreError> {
        // ---
        let sensor = sqlx::query_as::<_, Sensor>(
            r#"
            SELECT sensor_id, ap_mac_address AS mac_address, location
            FROM f_sensors
            WHERE ap_mac_address = $1
            "#,
        )
        .bind(mac_address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sensor)
    }
}

#[async_trait]
impl ReadingStore for PgStore {
    async fn insert(&self, reading: &NewReading) -> Result<i64, StoreError> {
        // ---
        let reading_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO f_sensor_readings (
                sensor_id, timestamp, rssi, ping, speed, ping_timeout, speed_drop_rate
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING reading_id
            "#,
        )
        .bind(reading.sensor_id)
        .bind(reading.timestamp)
        .bind(reading.rssi)
        .bind(reading.ping)
        .bind(reading.speed)
        .bind(reading.ping_timeout)
        .bind(reading.speed_drop_rate)
        .fetch_one(&self.pool)
        .await?;

        Ok(reading_id)
    }

    async fn find_latest_before(
        &self,
        sensor_id: i64,
        timestamp: NaiveDateTime,
    ) -> Result<Option<Reading>, StoreError> {
        // ---
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM f_sensor_readings \
             WHERE sensor_id = $1 AND timestamp < $2 \
             ORDER BY timestamp DESC, reading_id DESC LIMIT 1"
        );
        let reading = sqlx::query_as::<_, Reading>(&sql)
            .bind(sensor_id)
            .bind(timestamp)
            .fetch_optional(&self.pool)
            .await?;

        Ok(reading)
    }

    async fn find_by_id(&self, reading_id: i64) -> Result<Option<Reading>, StoreError> {
        // ---
        let sql = format!("SELECT {READING_COLUMNS} FROM f_sensor_readings WHERE reading_id = $1");
        let reading = sqlx::query_as::<_, Reading>(&sql)
            .bind(reading_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(reading)
    }

    async fn update_speed_drop_rate(
        &self,
        reading_id: i64,
        value: f64,
    ) -> Result<bool, StoreError> {
        // ---
        let result = sqlx::query(
            r#"
            UPDATE f_sensor_readings
            SET speed_drop_rate = $2
            WHERE reading_id = $1 AND speed_drop_rate IS NULL
            "#,
        )
        .bind(reading_id)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_pending_drop_rate(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        // ---
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM f_sensor_readings \
             WHERE speed_drop_rate IS NULL \
             ORDER BY sensor_id, timestamp, reading_id LIMIT $1"
        );
        let readings = sqlx::query_as::<_, Reading>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(readings)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<ReadingView>, StoreError> {
        // ---
        let views = sqlx::query_as::<_, ReadingView>(
            r#"
            SELECT sr.reading_id, s.location, s.ap_mac_address, sr.timestamp,
                   sr.rssi, sr.ping, sr.speed, sr.ping_timeout, sr.speed_drop_rate,
                   dr.problem_type
            FROM f_sensor_readings sr
            JOIN f_sensors s ON sr.sensor_id = s.sensor_id
            LEFT JOIN f_diagnosis_results dr ON dr.reading_id = sr.reading_id
            ORDER BY sr.timestamp DESC, sr.reading_id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(views)
    }
}

#[async_trait]
impl DiagnosisStore for PgStore {
    async fn upsert(&self, reading_id: i64, problem_type: &str) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO f_diagnosis_results (reading_id, problem_type)
            VALUES ($1, $2)
            ON CONFLICT (reading_id) DO UPDATE SET
                problem_type = EXCLUDED.problem_type,
                diagnosed_at = now()
            "#,
        )
        .bind(reading_id)
        .bind(problem_type)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_reading(&self, reading_id: i64) -> Result<Option<Diagnosis>, StoreError> {
        // ---
        let diagnosis = sqlx::query_as::<_, Diagnosis>(
            "SELECT reading_id, problem_type FROM f_diagnosis_results WHERE reading_id = $1",
        )
        .bind(reading_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(diagnosis)
    }
}
