//! Storage contracts consumed by the pipeline.
//!
//! Three narrow traits cover what the pipeline needs from the outside world:
//! - [`SensorDirectory`]: MAC address → registered sensor
//! - [`ReadingStore`]: append-only readings plus the drop-rate backfill
//! - [`DiagnosisStore`]: one diagnosis per reading, upserted
//!
//! Backends:
//! - [`PgStore`]: PostgreSQL via `sqlx`, used by the service binary
//! - [`InMemoryStore`]: `RwLock`-guarded maps for tests and local runs
//!
//! Implementations must be `Send + Sync`; concurrent batches share one
//! instance and rely on the backend to serialize conflicting writes.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Diagnosis, NewReading, Reading, ReadingView, Sensor};

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

// ---

/// Storage failures, split by whether the rest of a batch can continue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The store cannot be reached at all. Fatal for the remaining batch.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A single statement exceeded its time budget. Transient.
    #[error("store operation timed out: {0}")]
    Timeout(String),

    /// A single statement failed (constraint violation, bad data). Transient.
    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// Whether this error should abort the remaining batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Postgres SQLSTATE for a statement cancelled by `statement_timeout`.
const QUERY_CANCELED: &str = "57014";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        // ---
        match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED) => {
                StoreError::Timeout(e.to_string())
            }
            _ => StoreError::Query(e.to_string()),
        }
    }
}

/// Resolves physical sensor addresses to registered sensors.
#[async_trait]
pub trait SensorDirectory: Send + Sync {
    /// Look up a sensor by MAC address. `Ok(None)` means unregistered.
    async fn resolve(&self, mac_address: &str) -> Result<Option<Sensor>, StoreError>;
}

/// Append-only reading persistence.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Insert a reading and return its store-assigned id.
    async fn insert(&self, reading: &NewReading) -> Result<i64, StoreError>;

    /// Most recent reading for `sensor_id` strictly before `timestamp`.
    async fn find_latest_before(
        &self,
        sensor_id: i64,
        timestamp: NaiveDateTime,
    ) -> Result<Option<Reading>, StoreError>;

    async fn find_by_id(&self, reading_id: i64) -> Result<Option<Reading>, StoreError>;

    /// Set the drop rate only if it is still unset. Returns whether a row changed.
    async fn update_speed_drop_rate(&self, reading_id: i64, value: f64)
        -> Result<bool, StoreError>;

    /// Readings with an unset drop rate, ordered by sensor, timestamp, id.
    async fn find_pending_drop_rate(&self, limit: i64) -> Result<Vec<Reading>, StoreError>;

    /// Newest readings first, joined with sensor location and diagnosis.
    async fn list_recent(&self, limit: i64) -> Result<Vec<ReadingView>, StoreError>;
}

/// Diagnosis persistence keyed by reading id.
#[async_trait]
pub trait DiagnosisStore: Send + Sync {
    /// Insert, or overwrite `problem_type` if the reading already has one.
    async fn upsert(&self, reading_id: i64, problem_type: &str) -> Result<(), StoreError>;

    async fn find_by_reading(&self, reading_id: i64) -> Result<Option<Diagnosis>, StoreError>;
}

/// The three store handles the pipeline is built from.
#[derive(Clone)]
pub struct Stores {
    // ---
    pub sensors: Arc<dyn SensorDirectory>,
    pub readings: Arc<dyn ReadingStore>,
    pub diagnoses: Arc<dyn DiagnosisStore>,
}

impl Stores {
    /// Use one backend for all three contracts.
    pub fn shared<T>(store: Arc<T>) -> Self
    where
        T: SensorDirectory + ReadingStore + DiagnosisStore + 'static,
    {
        Self {
            sensors: store.clone(),
            readings: store.clone(),
            diagnoses: store,
        }
    }
}
