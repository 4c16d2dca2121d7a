//! Speed-drop-rate: signed fractional change in throughput relative to the
//! same sensor's immediately preceding reading.
//!
//! A negative value means the speed improved. A missing or non-positive
//! baseline yields `0.0` rather than an error. A ratio that overflows to a
//! non-finite value is never stored; the reading keeps an unset rate.

use chrono::NaiveDateTime;
use tracing::warn;

use crate::store::ReadingStore;

// ---

/// Apply the drop-rate rule to an optional prior speed.
pub fn speed_drop_rate(prior_speed: Option<f64>, speed: f64) -> f64 {
    // ---
    match prior_speed {
        Some(prior) if prior > 0.0 => (prior - speed) / prior,
        _ => 0.0,
    }
}

/// [`speed_drop_rate`], or `None` when the result is not a finite number.
pub fn finite_drop_rate(prior_speed: Option<f64>, speed: f64) -> Option<f64> {
    Some(speed_drop_rate(prior_speed, speed)).filter(|rate| rate.is_finite())
}

/// Compute the drop rate for a new reading against the store.
///
/// Returns `None` when the prior-reading lookup fails or the ratio is not
/// finite; the record then proceeds without this feature.
pub async fn compute(
    readings: &dyn ReadingStore,
    sensor_id: i64,
    timestamp: NaiveDateTime,
    speed: f64,
) -> Option<f64> {
    // ---
    match readings.find_latest_before(sensor_id, timestamp).await {
        Ok(prior) => {
            let prior_speed = prior.map(|p| p.speed);
            let rate = finite_drop_rate(prior_speed, speed);
            if rate.is_none() {
                warn!(sensor_id, ?prior_speed, speed, "Drop rate is not finite, left unset");
            }
            rate
        }
        Err(e) => {
            warn!(sensor_id, error = %e, "Prior reading lookup failed, drop rate left unset");
            None
        }
    }
}
