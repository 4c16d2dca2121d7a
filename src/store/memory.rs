//! In-memory store for tests and local runs.
//!
//! Thread-safe via `RwLock`. Not durable, data is lost on restart. Every write
//! is visible to the next read as soon as the call returns, which gives the
//! same per-sensor ordering guarantee as the database backend.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{DiagnosisStore, ReadingStore, SensorDirectory, StoreError};
use crate::models::{Diagnosis, NewReading, Reading, ReadingView, Sensor};

// ---

#[derive(Default)]
struct Inner {
    sensors: Vec<Sensor>,
    readings: BTreeMap<i64, Reading>,
    diagnoses: HashMap<i64, Diagnosis>,
    next_sensor_id: i64,
    next_reading_id: i64,
}

/// All three store contracts over shared in-process state.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor, standing in for the external registration process.
    pub fn register_sensor(&self, mac_address: &str, location: &str) -> Result<Sensor, StoreError> {
        // ---
        let mut inner = self.write()?;
        if inner.sensors.iter().any(|s| s.mac_address == mac_address) {
            return Err(StoreError::Query(format!(
                "duplicate mac address {mac_address}"
            )));
        }
        inner.next_sensor_id += 1;
        let sensor = Sensor {
            sensor_id: inner.next_sensor_id,
            mac_address: mac_address.to_string(),
            location: location.to_string(),
        };
        inner.sensors.push(sensor.clone());
        Ok(sensor)
    }

    /// Snapshot of all readings in insertion order.
    pub fn readings(&self) -> Result<Vec<Reading>, StoreError> {
        Ok(self.read()?.readings.values().cloned().collect())
    }

    /// Snapshot of all diagnoses ordered by reading id.
    pub fn diagnoses(&self) -> Result<Vec<Diagnosis>, StoreError> {
        // ---
        let mut all: Vec<Diagnosis> = self.read()?.diagnoses.values().cloned().collect();
        all.sort_by_key(|d| d.reading_id);
        Ok(all)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl SensorDirectory for InMemoryStore {
    async fn resolve(&self, mac_address: &str) -> Result<Option<Sensor>, StoreError> {
        Ok(self
            .read()?
            .sensors
            .iter()
            .find(|s| s.mac_address == mac_address)
            .cloned())
    }
}

#[async_trait]
impl ReadingStore for InMemoryStore {
    async fn insert(&self, reading: &NewReading) -> Result<i64, StoreError> {
        // ---
        let mut inner = self.write()?;
        if !inner.sensors.iter().any(|s| s.sensor_id == reading.sensor_id) {
            return Err(StoreError::Query(format!(
                "foreign key violation: sensor {} does not exist",
                reading.sensor_id
            )));
        }
        inner.next_reading_id += 1;
        let id = inner.next_reading_id;
        inner.readings.insert(id, reading.clone().with_id(id));
        Ok(id)
    }

    async fn find_latest_before(
        &self,
        sensor_id: i64,
        timestamp: NaiveDateTime,
    ) -> Result<Option<Reading>, StoreError> {
        // ---
        Ok(self
            .read()?
            .readings
            .values()
            .filter(|r| r.sensor_id == sensor_id && r.timestamp < timestamp)
            .max_by_key(|r| (r.timestamp, r.reading_id))
            .cloned())
    }

    async fn find_by_id(&self, reading_id: i64) -> Result<Option<Reading>, StoreError> {
        Ok(self.read()?.readings.get(&reading_id).cloned())
    }

    async fn update_speed_drop_rate(
        &self,
        reading_id: i64,
        value: f64,
    ) -> Result<bool, StoreError> {
        // ---
        let mut inner = self.write()?;
        match inner.readings.get_mut(&reading_id) {
            Some(r) if r.speed_drop_rate.is_none() => {
                r.speed_drop_rate = Some(value);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_pending_drop_rate(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        // ---
        let mut pending: Vec<Reading> = self
            .read()?
            .readings
            .values()
            .filter(|r| r.speed_drop_rate.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.sensor_id, r.timestamp, r.reading_id));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<ReadingView>, StoreError> {
        // ---
        let inner = self.read()?;
        let mut views: Vec<ReadingView> = inner
            .readings
            .values()
            .filter_map(|r| {
                let sensor = inner.sensors.iter().find(|s| s.sensor_id == r.sensor_id)?;
                Some(ReadingView {
                    reading_id: r.reading_id,
                    location: sensor.location.clone(),
                    ap_mac_address: sensor.mac_address.clone(),
                    timestamp: r.timestamp,
                    rssi: r.rssi,
                    ping: r.ping,
                    speed: r.speed,
                    ping_timeout: r.ping_timeout,
                    speed_drop_rate: r.speed_drop_rate,
                    problem_type: inner
                        .diagnoses
                        .get(&r.reading_id)
                        .map(|d| d.problem_type.clone()),
                })
            })
            .collect();
        views.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.reading_id.cmp(&a.reading_id))
        });
        views.truncate(limit.max(0) as usize);
        Ok(views)
    }
}

#[async_trait]
impl DiagnosisStore for InMemoryStore {
    async fn upsert(&self, reading_id: i64, problem_type: &str) -> Result<(), StoreError> {
        // ---
        let mut inner = self.write()?;
        if !inner.readings.contains_key(&reading_id) {
            return Err(StoreError::Query(format!(
                "foreign key violation: reading {reading_id} does not exist"
            )));
        }
        inner.diagnoses.insert(
            reading_id,
            Diagnosis {
                reading_id,
                problem_type: problem_type.to_string(),
            },
        );
        Ok(())
    }

    async fn find_by_reading(&self, reading_id: i64) -> Result<Option<Diagnosis>, StoreError> {
        Ok(self.read()?.diagnoses.get(&reading_id).cloned())
    }
}
