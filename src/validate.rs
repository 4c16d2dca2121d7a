//! Ingest validation: turns one untrusted JSON record into a [`ReadingCandidate`].
//!
//! Rules are applied in a fixed order and the first failure wins. The only
//! implicit default is the timestamp, which falls back to the caller-supplied
//! wall-clock time.

use chrono::{NaiveDateTime, Timelike};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{ReadingCandidate, TIMESTAMP_FORMAT};

// ---

/// Keys every record must carry. `timestamp` is optional and defaults to now.
pub const REQUIRED_KEYS: [&str; 5] = ["sensor_mac", "rssi", "ping", "speed", "ping_timeout"];

/// Why a raw record was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("field `sensor_mac` must be a non-empty string")]
    InvalidMac,

    #[error("field `{field}` is not a number: {value}")]
    NotNumeric { field: &'static str, value: String },

    #[error("timestamp `{0}` does not match YYYY-MM-DD HH:MM:SS")]
    BadTimestamp(String),

    #[error("field `ping_timeout` is not interpretable as a boolean: {0}")]
    NotBoolean(String),
}

/// Validate one raw record.
///
/// `now` is substituted when the record has no timestamp; callers pass the
/// current local time truncated to whole seconds.
pub fn validate(raw: &Value, now: NaiveDateTime) -> Result<ReadingCandidate, ValidationError> {
    // ---
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let missing: Vec<String> = REQUIRED_KEYS
        .iter()
        .filter(|k| !obj.contains_key(**k))
        .map(|k| k.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields(missing));
    }

    let sensor_mac = match obj.get("sensor_mac") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return Err(ValidationError::InvalidMac),
    };

    let rssi = number_field(obj, "rssi")?;
    let ping = number_field(obj, "ping")?;
    let speed = number_field(obj, "speed")?;

    let timestamp = match obj.get("timestamp") {
        None | Some(Value::Null) => now,
        Some(Value::String(s)) => parse_timestamp(s)?,
        Some(other) => return Err(ValidationError::BadTimestamp(other.to_string())),
    };

    let ping_timeout = coerce_bool(&obj["ping_timeout"])?;

    Ok(ReadingCandidate {
        sensor_mac,
        timestamp,
        rssi,
        ping,
        speed,
        ping_timeout,
    })
}

/// Parse `YYYY-MM-DD HH:MM:SS`, rejecting any other width.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, ValidationError> {
    // ---
    // chrono accepts unpadded fields; the wire pattern is fixed-width.
    if s.len() != 19 {
        return Err(ValidationError::BadTimestamp(s.to_string()));
    }
    // `%S` also accepts a leap second (`:60`), which has no stored form.
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .filter(|ts| ts.nanosecond() < 1_000_000_000)
        .ok_or_else(|| ValidationError::BadTimestamp(s.to_string()))
}

fn number_field(obj: &Map<String, Value>, field: &'static str) -> Result<f64, ValidationError> {
    // ---
    let value = &obj[field];
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(ValidationError::NotNumeric {
            field,
            value: value.to_string(),
        }),
    }
}

/// Truthy/falsy coercion for the timeout flag.
fn coerce_bool(value: &Value) -> Result<bool, ValidationError> {
    // ---
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        Value::Number(n) => Ok(n.as_f64().map_or(false, |v| v != 0.0)),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            Ok(!matches!(s.as_str(), "" | "0" | "false" | "no" | "off"))
        }
        Value::Array(_) | Value::Object(_) => Err(ValidationError::NotBoolean(value.to_string())),
    }
}
