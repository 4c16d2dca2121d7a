//! Ingestion-diagnosis pipeline.
//!
//! Each raw record moves through
//! `Received → Validated → SensorResolved → RateComputed → Persisted →
//! Classified → DiagnosisPersisted → Stored`, or ends in `Skipped(reason)`
//! at any step before `Persisted`. Once a reading is persisted the record is
//! always reported as stored; a failed classification produces an error
//! label and a failed diagnosis write is flagged on the [`Stored`] value.
//!
//! Records are processed one at a time, in order, and every insert completes
//! before the next record's prior-reading lookup. Only a store that is
//! unavailable altogether aborts the rest of a batch.

use chrono::{Local, NaiveDateTime, Timelike};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::{Classifier, Features};
use crate::drop_rate;
use crate::models::{labels, AlertEvent, AlertLevel, Reading, ReadingView, Sensor};
use crate::notifier::{AlertDispatcher, Notifier};
use crate::store::{StoreError, Stores};
use crate::validate::{validate, ValidationError};

// ---

/// Why a record was skipped. Logged and alerted, never returned to the client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error("invalid record: {0}")]
    Invalid(#[from] ValidationError),

    #[error("unregistered sensor mac address {0}")]
    UnregisteredSensor(String),

    #[error("sensor lookup failed: {0}")]
    SensorLookup(StoreError),

    #[error("failed to store reading: {0}")]
    Persistence(StoreError),
}

/// A record that reached the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored {
    // ---
    pub reading_id: i64,
    pub sensor_id: i64,
    pub speed_drop_rate: Option<f64>,
    pub problem_type: String,
    /// False when the diagnosis write failed; repairable by reclassifying.
    pub diagnosis_persisted: bool,
}

/// Terminal state of one record.
pub type RecordOutcome = Result<Stored, SkipReason>;

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: SkipReason,
}

/// Aggregate result of one batch.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    // ---
    pub batch_id: Uuid,
    pub received: usize,
    pub stored: Vec<Stored>,
    pub skipped: Vec<SkippedRecord>,
}

impl BatchSummary {
    // ---
    pub fn stored_count(&self) -> usize {
        self.stored.len()
    }
}

/// Result of a manual reclassification.
#[derive(Debug, Clone, PartialEq)]
pub struct Reclassified {
    pub reading_id: i64,
    pub problem_type: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The store is gone; the remaining batch was abandoned.
    #[error("store unavailable: {0}")]
    StoreUnavailable(StoreError),

    #[error(transparent)]
    Store(StoreError),

    #[error("reading {0} not found")]
    ReadingNotFound(i64),
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        if e.is_fatal() {
            PipelineError::StoreUnavailable(e)
        } else {
            PipelineError::Store(e)
        }
    }
}

/// Tunables that are not part of any collaborator.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    // ---
    /// Upper bound on a single alert delivery.
    pub notify_timeout: Duration,
    /// Alerts that may wait for delivery before new ones are dropped.
    pub alert_queue_capacity: usize,
    /// Maximum pending readings scanned per recompute run.
    pub recompute_batch_limit: i64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            notify_timeout: Duration::from_secs(10),
            alert_queue_capacity: 1024,
            recompute_batch_limit: 10_000,
        }
    }
}

/// The batch processor and its collaborators.
pub struct Pipeline {
    pub(crate) stores: Stores,
    classifier: Arc<Classifier>,
    alerts: AlertDispatcher,
    pub(crate) options: PipelineOptions,
}

/// Current local time truncated to whole seconds.
pub fn local_now() -> NaiveDateTime {
    // ---
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

impl Pipeline {
    // ---
    /// Must be called from within a Tokio runtime; alert delivery runs on a
    /// background task owned by the pipeline.
    pub fn new(
        stores: Stores,
        classifier: Arc<Classifier>,
        notifier: Arc<dyn Notifier>,
        options: PipelineOptions,
    ) -> Self {
        let alerts =
            AlertDispatcher::spawn(notifier, options.alert_queue_capacity, options.notify_timeout);
        Self {
            stores,
            classifier,
            alerts,
            options,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Process an ordered batch of raw records.
    ///
    /// Returns how many records were stored; per-record detail goes to the
    /// log and the notifier. Fails only when the store becomes unavailable.
    #[tracing::instrument(skip_all, fields(batch_id = tracing::field::Empty, records = records.len()))]
    pub async fn process_batch(&self, records: &[Value]) -> Result<BatchSummary, PipelineError> {
        // ---
        let batch_id = Uuid::new_v4();
        tracing::Span::current().record("batch_id", tracing::field::display(batch_id));

        let mut summary = BatchSummary {
            batch_id,
            received: records.len(),
            stored: Vec::new(),
            skipped: Vec::new(),
        };

        for (index, raw) in records.iter().enumerate() {
            match self.process_record(raw, local_now()).await {
                Ok(Ok(stored)) => summary.stored.push(stored),
                Ok(Err(reason)) => {
                    warn!(index, reason = %reason, "Record skipped");
                    summary.skipped.push(SkippedRecord { index, reason });
                }
                Err(e) => {
                    error!(
                        index,
                        stored = summary.stored.len(),
                        error = %e,
                        "Store unavailable, abandoning remaining batch"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            received = summary.received,
            stored = summary.stored.len(),
            skipped = summary.skipped.len(),
            "Batch complete"
        );
        Ok(summary)
    }

    /// Run one record to a terminal state.
    ///
    /// The outer `Err` is reserved for a fatal store failure.
    pub async fn process_record(
        &self,
        raw: &Value,
        now: NaiveDateTime,
    ) -> Result<RecordOutcome, PipelineError> {
        // ---
        let candidate = match validate(raw, now) {
            Ok(c) => c,
            Err(e) => {
                let mac = raw
                    .get("sensor_mac")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                self.alert(AlertEvent {
                    sensor: mac.to_string(),
                    location: "unknown".to_string(),
                    reason: format!("invalid record: {e}"),
                    occurred_at: now,
                    level: AlertLevel::Warning,
                });
                return Ok(Err(SkipReason::Invalid(e)));
            }
        };

        let resolved = self.stores.sensors.resolve(&candidate.sensor_mac).await;
        let sensor = match resolved {
            Ok(Some(sensor)) => sensor,
            Ok(None) => {
                self.alert(AlertEvent {
                    sensor: candidate.sensor_mac.clone(),
                    location: "unregistered".to_string(),
                    reason: format!("unregistered sensor mac address {}", candidate.sensor_mac),
                    occurred_at: candidate.timestamp,
                    level: AlertLevel::Warning,
                });
                return Ok(Err(SkipReason::UnregisteredSensor(candidate.sensor_mac)));
            }
            Err(e) if e.is_fatal() => return Err(PipelineError::StoreUnavailable(e)),
            Err(e) => {
                self.alert(AlertEvent {
                    sensor: candidate.sensor_mac.clone(),
                    location: "unknown".to_string(),
                    reason: format!("sensor lookup failed: {e}"),
                    occurred_at: candidate.timestamp,
                    level: AlertLevel::Error,
                });
                return Ok(Err(SkipReason::SensorLookup(e)));
            }
        };

        let rate = drop_rate::compute(
            self.stores.readings.as_ref(),
            sensor.sensor_id,
            candidate.timestamp,
            candidate.speed,
        )
        .await;

        let new_reading = candidate.into_new_reading(sensor.sensor_id, rate);
        let reading_id = match self.stores.readings.insert(&new_reading).await {
            Ok(id) => id,
            Err(e) if e.is_fatal() => return Err(PipelineError::StoreUnavailable(e)),
            Err(e) => {
                self.alert(AlertEvent {
                    sensor: sensor.sensor_id.to_string(),
                    location: sensor.location.clone(),
                    reason: format!("failed to store reading: {e}"),
                    occurred_at: new_reading.timestamp,
                    level: AlertLevel::Error,
                });
                return Ok(Err(SkipReason::Persistence(e)));
            }
        };
        let reading = new_reading.with_id(reading_id);
        info!(reading_id, sensor_id = sensor.sensor_id, speed_drop_rate = ?rate, "Reading stored");

        let (problem_type, diagnosis_persisted) = self.diagnose(&reading).await?;

        self.alert(diagnosis_alert(&sensor, &reading, &problem_type, diagnosis_persisted));

        Ok(Ok(Stored {
            reading_id,
            sensor_id: sensor.sensor_id,
            speed_drop_rate: rate,
            problem_type,
            diagnosis_persisted,
        }))
    }

    /// Classify a persisted reading and upsert its diagnosis.
    ///
    /// A non-fatal write failure is reported as `false` rather than an error.
    async fn diagnose(&self, reading: &Reading) -> Result<(String, bool), PipelineError> {
        // ---
        let problem_type = self.classifier.classify(&Features::from_reading(reading));
        debug!(reading_id = reading.reading_id, %problem_type, "Reading classified");

        match self
            .stores
            .diagnoses
            .upsert(reading.reading_id, &problem_type)
            .await
        {
            Ok(()) => Ok((problem_type, true)),
            Err(e) if e.is_fatal() => Err(PipelineError::StoreUnavailable(e)),
            Err(e) => {
                error!(
                    reading_id = reading.reading_id,
                    error = %e,
                    "Failed to store diagnosis"
                );
                Ok((problem_type, false))
            }
        }
    }

    /// Re-run classification for an existing reading and overwrite its
    /// diagnosis. Repeated calls leave exactly one diagnosis row.
    pub async fn reclassify(&self, reading_id: i64) -> Result<Reclassified, PipelineError> {
        // ---
        let reading = self
            .stores
            .readings
            .find_by_id(reading_id)
            .await?
            .ok_or(PipelineError::ReadingNotFound(reading_id))?;

        let problem_type = self.classifier.classify(&Features::from_reading(&reading));
        self.stores
            .diagnoses
            .upsert(reading_id, &problem_type)
            .await?;

        info!(reading_id, %problem_type, classifier = self.classifier.name(), "Reading reclassified");
        Ok(Reclassified {
            reading_id,
            problem_type,
        })
    }

    /// Most recent readings, newest first, joined with sensor location.
    pub async fn recent_readings(&self, limit: i64) -> Result<Vec<ReadingView>, PipelineError> {
        Ok(self.stores.readings.list_recent(limit).await?)
    }

    /// Wait for every alert raised so far to be delivered or given up on.
    pub async fn flush_alerts(&self) {
        self.alerts.flush().await;
    }

    /// Queue an alert; never waits on the notifier.
    fn alert(&self, alert: AlertEvent) {
        self.alerts.dispatch(alert);
    }
}

/// Alert for a stored record; the level reflects the diagnosis.
fn diagnosis_alert(
    sensor: &Sensor,
    reading: &Reading,
    problem_type: &str,
    diagnosis_persisted: bool,
) -> AlertEvent {
    // ---
    let (level, reason) = if !diagnosis_persisted {
        (
            AlertLevel::Error,
            format!("prediction: {problem_type} (diagnosis not saved)"),
        )
    } else if problem_type == labels::CLASSIFICATION_ERROR {
        (AlertLevel::Error, format!("prediction: {problem_type}"))
    } else if problem_type == labels::NORMAL {
        (AlertLevel::Info, format!("prediction: {problem_type}"))
    } else {
        (AlertLevel::Warning, format!("prediction: {problem_type}"))
    };

    AlertEvent {
        sensor: sensor.sensor_id.to_string(),
        location: sensor.location.clone(),
        reason,
        occurred_at: reading.timestamp,
        level,
    }
}
