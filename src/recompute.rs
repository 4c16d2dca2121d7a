//! Drop-rate backfill for readings stored without one.
//!
//! Maintenance only, not on the ingest path. Each pending reading is compared
//! against its sensor's most recent prior reading with the same rule as
//! ingestion, and written through the store's null-only update so values
//! that are already set are never overwritten.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::drop_rate::finite_drop_rate;
use crate::models::Reading;
use crate::pipeline::{Pipeline, PipelineError};
use crate::store::{ReadingStore, StoreError};

// ---

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecomputeSummary {
    // ---
    /// Pending readings examined.
    pub scanned: usize,
    /// Readings whose drop rate was written.
    pub updated: usize,
    /// Readings left pending because a lookup or write failed, or the rate
    /// came out non-finite.
    pub failed: usize,
    /// Distinct sensors touched.
    pub sensors: usize,
}

impl Pipeline {
    // ---
    /// Backfill pending drop rates. Aborts only if the store is unavailable.
    pub async fn recompute_pending(&self) -> Result<RecomputeSummary, PipelineError> {
        // ---
        let readings = &self.stores.readings;
        let pending = readings
            .find_pending_drop_rate(self.options.recompute_batch_limit)
            .await?;

        let mut summary = RecomputeSummary {
            scanned: pending.len(),
            sensors: pending
                .iter()
                .map(|r| r.sensor_id)
                .collect::<BTreeSet<_>>()
                .len(),
            ..Default::default()
        };

        for reading in &pending {
            match backfill_one(readings.as_ref(), reading).await {
                Ok(Backfill::Updated) => summary.updated += 1,
                // Set concurrently by someone else; leave it alone.
                Ok(Backfill::AlreadySet) => {}
                Ok(Backfill::NotFinite) => {
                    warn!(
                        reading_id = reading.reading_id,
                        sensor_id = reading.sensor_id,
                        "Drop rate is not finite, left unset"
                    );
                    summary.failed += 1;
                }
                Err(e) if e.is_fatal() => return Err(PipelineError::StoreUnavailable(e)),
                Err(e) => {
                    warn!(
                        reading_id = reading.reading_id,
                        sensor_id = reading.sensor_id,
                        error = %e,
                        "Drop rate backfill failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            scanned = summary.scanned,
            updated = summary.updated,
            failed = summary.failed,
            sensors = summary.sensors,
            "Drop rate recompute complete"
        );
        Ok(summary)
    }
}

enum Backfill {
    Updated,
    AlreadySet,
    NotFinite,
}

/// Recompute one reading against its prior and write it if still unset.
async fn backfill_one(readings: &dyn ReadingStore, reading: &Reading) -> Result<Backfill, StoreError> {
    // ---
    let prior = readings
        .find_latest_before(reading.sensor_id, reading.timestamp)
        .await?;
    let Some(rate) = finite_drop_rate(prior.map(|p| p.speed), reading.speed) else {
        return Ok(Backfill::NotFinite);
    };

    let changed = readings
        .update_speed_drop_rate(reading.reading_id, rate)
        .await?;
    Ok(if changed {
        Backfill::Updated
    } else {
        Backfill::AlreadySet
    })
}
