//! Shared fixtures for integration tests: a fault-injecting store wrapper,
//! recording/failing notifiers and record builders.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wifi_diagnosis::notifier::NotifyError;
use wifi_diagnosis::store::{DiagnosisStore, ReadingStore, SensorDirectory};
use wifi_diagnosis::{
    AlertEvent, Classifier, Diagnosis, InMemoryStore, Notifier, Pipeline, PipelineOptions,
    Reading, ReadingView, Sensor, StoreError, Stores,
};

pub const MAC_A: &str = "AA:BB:CC:DD:EE:01";
pub const MAC_B: &str = "AA:BB:CC:DD:EE:02";

// ---

pub fn record(mac: &str, ts: &str, rssi: f64, ping: f64, speed: f64) -> Value {
    json!({
        "sensor_mac": mac,
        "rssi": rssi,
        "ping": ping,
        "speed": speed,
        "timestamp": ts,
        "ping_timeout": false
    })
}

pub fn pipeline_with<S>(store: Arc<S>, classifier: Classifier, notifier: Arc<dyn Notifier>) -> Pipeline
where
    S: SensorDirectory + ReadingStore + DiagnosisStore + 'static,
{
    Pipeline::new(
        Stores::shared(store),
        Arc::new(classifier),
        notifier,
        PipelineOptions {
            notify_timeout: Duration::from_millis(200),
            ..Default::default()
        },
    )
}

/// In-memory store with two registered sensors.
pub fn seeded_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.register_sensor(MAC_A, "Library 1F").unwrap();
    store.register_sensor(MAC_B, "Student Union 2F").unwrap();
    store
}

/// Wraps [`InMemoryStore`] with switchable failures.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    /// Prior-reading lookups return a timeout.
    pub lookups_fail: AtomicBool,
    /// Inserts of a reading with this exact speed fail with a query error.
    pub poison_speed: Mutex<Option<f64>>,
    /// Diagnosis upserts fail with a query error.
    pub upserts_fail: AtomicBool,
    /// After this many successful inserts every call reports the store unavailable.
    pub unavailable_after_inserts: AtomicUsize,
    inserts: AtomicUsize,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        let inner = InMemoryStore::new();
        inner.register_sensor(MAC_A, "Library 1F").unwrap();
        inner.register_sensor(MAC_B, "Student Union 2F").unwrap();
        Self {
            inner,
            lookups_fail: AtomicBool::new(false),
            poison_speed: Mutex::new(None),
            upserts_fail: AtomicBool::new(false),
            unavailable_after_inserts: AtomicUsize::new(usize::MAX),
            inserts: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }

    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SensorDirectory for FlakyStore {
    async fn resolve(&self, mac_address: &str) -> Result<Option<Sensor>, StoreError> {
        self.check_up()?;
        self.inner.resolve(mac_address).await
    }
}

#[async_trait]
impl ReadingStore for FlakyStore {
    async fn insert(&self, reading: &wifi_diagnosis::models::NewReading) -> Result<i64, StoreError> {
        self.check_up()?;
        if *self.poison_speed.lock().unwrap() == Some(reading.speed) {
            return Err(StoreError::Query("check constraint violated".into()));
        }
        let id = self.inner.insert(reading).await?;
        let n = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.unavailable_after_inserts.load(Ordering::SeqCst) {
            self.go_down();
        }
        Ok(id)
    }

    async fn find_latest_before(
        &self,
        sensor_id: i64,
        timestamp: NaiveDateTime,
    ) -> Result<Option<Reading>, StoreError> {
        self.check_up()?;
        if self.lookups_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout("canceling statement due to statement timeout".into()));
        }
        self.inner.find_latest_before(sensor_id, timestamp).await
    }

    async fn find_by_id(&self, reading_id: i64) -> Result<Option<Reading>, StoreError> {
        self.check_up()?;
        self.inner.find_by_id(reading_id).await
    }

    async fn update_speed_drop_rate(&self, reading_id: i64, value: f64) -> Result<bool, StoreError> {
        self.check_up()?;
        self.inner.update_speed_drop_rate(reading_id, value).await
    }

    async fn find_pending_drop_rate(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        self.check_up()?;
        self.inner.find_pending_drop_rate(limit).await
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<ReadingView>, StoreError> {
        self.check_up()?;
        self.inner.list_recent(limit).await
    }
}

#[async_trait]
impl DiagnosisStore for FlakyStore {
    async fn upsert(&self, reading_id: i64, problem_type: &str) -> Result<(), StoreError> {
        self.check_up()?;
        if self.upserts_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Query("deadlock detected".into()));
        }
        self.inner.upsert(reading_id, problem_type).await
    }

    async fn find_by_reading(&self, reading_id: i64) -> Result<Option<Diagnosis>, StoreError> {
        self.check_up()?;
        self.inner.find_by_reading(reading_id).await
    }
}

/// Keeps every alert it is given.
#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<AlertEvent>>,
}

impl RecordingNotifier {
    pub fn taken(&self) -> Vec<AlertEvent> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &AlertEvent) -> Result<(), NotifyError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }

    fn notifier_name(&self) -> &'static str {
        "recording"
    }
}

/// Never delivers: either errors out immediately or hangs past any timeout.
pub struct BrokenNotifier {
    pub hang: bool,
}

#[async_trait]
impl Notifier for BrokenNotifier {
    async fn notify(&self, _alert: &AlertEvent) -> Result<(), NotifyError> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Err(NotifyError::Timeout(Duration::ZERO))
    }

    fn notifier_name(&self) -> &'static str {
        "broken"
    }
}
