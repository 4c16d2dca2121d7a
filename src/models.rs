//! Data models for the WiFi diagnosis pipeline.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ---

/// Canonical textual pattern for reading timestamps and alert times.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Problem-type labels produced by the classifier.
pub mod labels {
    pub const NORMAL: &str = "normal";
    pub const TRAFFIC_SURGE: &str = "traffic_surge";
    pub const BACKHAUL_ISSUE: &str = "backhaul_issue";
    pub const ROUTER_ISSUE: &str = "router_issue";

    /// Written when a loaded model fails at prediction time.
    pub const CLASSIFICATION_ERROR: &str = "classification_error";
}

/// Format a timestamp with [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Serde adapter so API payloads carry `YYYY-MM-DD HH:MM:SS` strings.
pub mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// A registered sensor, owned by the external registration process.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Sensor {
    // ---
    pub sensor_id: i64,
    pub mac_address: String,
    pub location: String,
}

/// A record that passed validation but has not been tied to a sensor yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingCandidate {
    // ---
    pub sensor_mac: String,
    pub timestamp: NaiveDateTime,
    pub rssi: f64,
    pub ping: f64,
    pub speed: f64,
    pub ping_timeout: bool,
}

/// A reading ready to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    // ---
    pub sensor_id: i64,
    pub timestamp: NaiveDateTime,
    pub rssi: f64,
    pub ping: f64,
    pub speed: f64,
    pub ping_timeout: bool,
    pub speed_drop_rate: Option<f64>,
}

/// A persisted reading.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Reading {
    // ---
    pub reading_id: i64,
    pub sensor_id: i64,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub rssi: f64,
    pub ping: f64,
    pub speed: f64,
    pub ping_timeout: bool,
    pub speed_drop_rate: Option<f64>,
}

impl ReadingCandidate {
    // ---
    pub fn into_new_reading(self, sensor_id: i64, speed_drop_rate: Option<f64>) -> NewReading {
        // ---
        NewReading {
            sensor_id,
            timestamp: self.timestamp,
            rssi: self.rssi,
            ping: self.ping,
            speed: self.speed,
            ping_timeout: self.ping_timeout,
            speed_drop_rate,
        }
    }
}

impl NewReading {
    // ---
    pub fn with_id(self, reading_id: i64) -> Reading {
        // ---
        Reading {
            reading_id,
            sensor_id: self.sensor_id,
            timestamp: self.timestamp,
            rssi: self.rssi,
            ping: self.ping,
            speed: self.speed,
            ping_timeout: self.ping_timeout,
            speed_drop_rate: self.speed_drop_rate,
        }
    }
}

/// The classified problem label attached to exactly one reading.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Diagnosis {
    // ---
    pub reading_id: i64,
    pub problem_type: String,
}

/// A reading joined with its sensor, as served by `GET /readings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReadingView {
    // ---
    pub reading_id: i64,
    pub location: String,
    pub ap_mac_address: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub rssi: f64,
    pub ping: f64,
    pub speed: f64,
    pub ping_timeout: bool,
    pub speed_drop_rate: Option<f64>,
    pub problem_type: Option<String>,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

impl AlertLevel {
    // ---
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alert per processed record. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    // ---
    /// Sensor id when resolved, otherwise the submitted MAC address.
    pub sensor: String,
    pub location: String,
    pub reason: String,
    #[serde(with = "timestamp_format")]
    pub occurred_at: NaiveDateTime,
    pub level: AlertLevel,
}

impl AlertEvent {
    // ---
    pub fn occurred_at_text(&self) -> String {
        format_timestamp(&self.occurred_at)
    }
}
