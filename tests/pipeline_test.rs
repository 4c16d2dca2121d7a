use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::NaiveDate;
use serde_json::json;

use wifi_diagnosis::classifier::ForestModel;
use wifi_diagnosis::models::{labels, NewReading};
use wifi_diagnosis::store::{DiagnosisStore, ReadingStore, SensorDirectory};
use wifi_diagnosis::validate::ValidationError;
use wifi_diagnosis::{
    AlertLevel, Classifier, LogNotifier, Pipeline, PipelineError, PipelineOptions, SkipReason,
    Stores,
};

mod common;
use common::*;

fn always(label: &str) -> Classifier {
    let json = format!(
        r#"{{ "feature_columns": ["rssi"], "trees": [ {{ "nodes": [ {{ "kind": "leaf", "label": "{label}" }} ] }} ] }}"#
    );
    Classifier::TrainedModel(ForestModel::from_json(&json).unwrap())
}

#[tokio::test]
async fn one_malformed_record_does_not_affect_the_rest() -> Result<()> {
    // ---
    let store = seeded_store();
    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(LogNotifier));

    let mut batch = vec![
        record(MAC_A, "2025-07-01 09:00:00", -40.0, 10.0, 15.0),
        record(MAC_B, "2025-07-01 09:00:00", -90.0, 150.0, 20.0),
        record(MAC_A, "2025-07-01 09:05:00", -60.0, 60.0, 3.0),
        record(MAC_B, "2025-07-01 09:05:00", -65.0, 40.0, 8.0),
        record(MAC_A, "2025-07-01 09:10:00", -40.0, 10.0, 15.0),
    ];
    batch[2].as_object_mut().unwrap().remove("speed");

    let summary = pipeline.process_batch(&batch).await?;

    assert_eq!(summary.received, 5);
    assert_eq!(summary.stored_count(), 4);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].index, 2);
    assert_eq!(
        summary.skipped[0].reason,
        SkipReason::Invalid(ValidationError::MissingFields(vec!["speed".to_string()]))
    );

    assert_eq!(store.readings()?.len(), 4);
    assert_eq!(store.diagnoses()?.len(), 4);

    let labels: Vec<&str> = summary.stored.iter().map(|s| s.problem_type.as_str()).collect();
    assert_eq!(labels, vec!["normal", "traffic_surge", "router_issue", "normal"]);
    Ok(())
}

#[tokio::test]
async fn same_sensor_records_see_their_predecessor() -> Result<()> {
    // ---
    let store = seeded_store();
    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(LogNotifier));

    let batch = vec![
        record(MAC_A, "2025-07-01 10:00:00", -60.0, 20.0, 10.0),
        record(MAC_A, "2025-07-01 10:01:00", -60.0, 20.0, 5.0),
    ];
    let summary = pipeline.process_batch(&batch).await?;

    let rates: Vec<Option<f64>> = summary.stored.iter().map(|s| s.speed_drop_rate).collect();
    assert_eq!(rates, vec![Some(0.0), Some(0.5)]);

    let stored: Vec<Option<f64>> = store.readings()?.iter().map(|r| r.speed_drop_rate).collect();
    assert_eq!(stored, vec![Some(0.0), Some(0.5)]);
    Ok(())
}

#[tokio::test]
async fn drop_rate_is_signed_and_zero_for_non_positive_baseline() -> Result<()> {
    // ---
    let store = seeded_store();
    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(LogNotifier));

    let batch = vec![
        record(MAC_A, "2025-07-01 10:00:00", -60.0, 20.0, 0.0),
        record(MAC_A, "2025-07-01 10:01:00", -60.0, 20.0, 8.0),
        record(MAC_A, "2025-07-01 10:02:00", -60.0, 20.0, 12.0),
        // Another sensor does not count as a prior reading.
        record(MAC_B, "2025-07-01 10:03:00", -60.0, 20.0, 1.0),
    ];
    let summary = pipeline.process_batch(&batch).await?;

    let rates: Vec<Option<f64>> = summary.stored.iter().map(|s| s.speed_drop_rate).collect();
    assert_eq!(rates, vec![Some(0.0), Some(0.0), Some(-0.5), Some(0.0)]);
    Ok(())
}

#[tokio::test]
async fn reclassify_twice_keeps_one_diagnosis_with_latest_label() -> Result<()> {
    // ---
    let store = seeded_store();
    let before = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(LogNotifier));
    let after = pipeline_with(store.clone(), always("traffic_surge"), Arc::new(LogNotifier));

    let summary = before
        .process_batch(&[record(MAC_A, "2025-07-01 11:00:00", -40.0, 10.0, 15.0)])
        .await?;
    let reading_id = summary.stored[0].reading_id;
    assert_eq!(summary.stored[0].problem_type, "normal");

    let first = before.reclassify(reading_id).await?;
    assert_eq!(first.problem_type, "normal");

    let second = after.reclassify(reading_id).await?;
    assert_eq!(second.problem_type, "traffic_surge");

    let all = store.diagnoses()?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].reading_id, reading_id);
    assert_eq!(all[0].problem_type, "traffic_surge");
    Ok(())
}

#[tokio::test]
async fn recompute_backfills_only_unset_rates() -> Result<()> {
    // ---
    let store = seeded_store();
    let a = store.resolve(MAC_A).await?.unwrap().sensor_id;
    let b = store.resolve(MAC_B).await?.unwrap().sensor_id;
    let at = |minute: u32| {
        NaiveDate::from_ymd_opt(2025, 7, 3)
            .unwrap()
            .and_hms_opt(12, minute, 0)
            .unwrap()
    };
    let seed = |sensor_id: i64, minute: u32, speed: f64, rate: Option<f64>| NewReading {
        sensor_id,
        timestamp: at(minute),
        rssi: -60.0,
        ping: 20.0,
        speed,
        ping_timeout: false,
        speed_drop_rate: rate,
    };

    let a1 = store.insert(&seed(a, 0, 20.0, None)).await?;
    let a2 = store.insert(&seed(a, 1, 10.0, Some(0.9))).await?;
    let a3 = store.insert(&seed(a, 2, 5.0, None)).await?;
    let b1 = store.insert(&seed(b, 0, 0.0, None)).await?;
    let b2 = store.insert(&seed(b, 1, 4.0, None)).await?;

    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(LogNotifier));
    let summary = pipeline.recompute_pending().await?;

    assert_eq!(summary.scanned, 4);
    assert_eq!(summary.updated, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.sensors, 2);

    let rate = |id: i64| {
        let store = store.clone();
        async move { store.find_by_id(id).await.unwrap().unwrap().speed_drop_rate }
    };
    assert_eq!(rate(a1).await, Some(0.0));
    assert_eq!(rate(a2).await, Some(0.9));
    assert_eq!(rate(a3).await, Some(0.5));
    assert_eq!(rate(b1).await, Some(0.0));
    // Prior speed of 0.0 is not a usable baseline.
    assert_eq!(rate(b2).await, Some(0.0));

    // Nothing left to do on a second run.
    let again = pipeline.recompute_pending().await?;
    assert_eq!(again.scanned, 0);
    assert_eq!(again.updated, 0);
    Ok(())
}

#[tokio::test]
async fn failed_prior_lookup_stores_reading_without_rate() -> Result<()> {
    // ---
    let store = Arc::new(FlakyStore::new());
    store.lookups_fail.store(true, Ordering::SeqCst);
    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(LogNotifier));

    let summary = pipeline
        .process_batch(&[record(MAC_A, "2025-07-01 12:00:00", -40.0, 10.0, 15.0)])
        .await?;

    assert_eq!(summary.stored_count(), 1);
    assert_eq!(summary.stored[0].speed_drop_rate, None);
    assert_eq!(summary.stored[0].problem_type, "normal");

    let reading = store.inner.readings()?.remove(0);
    assert_eq!(reading.speed_drop_rate, None);
    assert_eq!(store.inner.diagnoses()?.len(), 1);

    // The backfill picks it up once lookups work again.
    store.lookups_fail.store(false, Ordering::SeqCst);
    let recompute = pipeline.recompute_pending().await?;
    assert_eq!(recompute.updated, 1);
    Ok(())
}

#[tokio::test]
async fn recompute_counts_failures_and_continues() -> Result<()> {
    // ---
    let store = Arc::new(FlakyStore::new());
    store.lookups_fail.store(true, Ordering::SeqCst);
    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(LogNotifier));

    pipeline
        .process_batch(&[
            record(MAC_A, "2025-07-01 12:00:00", -40.0, 10.0, 15.0),
            record(MAC_B, "2025-07-01 12:00:00", -40.0, 10.0, 15.0),
        ])
        .await?;

    let summary = pipeline.recompute_pending().await?;
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.updated, 0);
    Ok(())
}

#[tokio::test]
async fn insert_failure_skips_only_that_record() -> Result<()> {
    // ---
    let store = Arc::new(FlakyStore::new());
    *store.poison_speed.lock().unwrap() = Some(13.0);
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, notifier.clone());

    let summary = pipeline
        .process_batch(&[
            record(MAC_A, "2025-07-01 13:00:00", -40.0, 10.0, 15.0),
            record(MAC_A, "2025-07-01 13:01:00", -40.0, 10.0, 13.0),
            record(MAC_A, "2025-07-01 13:02:00", -40.0, 10.0, 15.0),
        ])
        .await?;
    pipeline.flush_alerts().await;

    assert_eq!(summary.stored_count(), 2);
    assert!(matches!(
        summary.skipped[0].reason,
        SkipReason::Persistence(ref e) if !e.is_fatal()
    ));
    assert_eq!(store.inner.diagnoses()?.len(), 2);

    let alerts = notifier.taken();
    assert_eq!(alerts.len(), 3);
    assert_eq!(alerts[1].level, AlertLevel::Error);
    assert_eq!(alerts[1].location, "Library 1F");
    Ok(())
}

#[tokio::test]
async fn store_loss_aborts_remaining_batch() -> Result<()> {
    // ---
    let store = Arc::new(FlakyStore::new());
    store.unavailable_after_inserts.store(2, Ordering::SeqCst);
    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(LogNotifier));

    let batch: Vec<_> = (0..5)
        .map(|i| record(MAC_A, &format!("2025-07-01 14:0{i}:00"), -40.0, 10.0, 15.0))
        .collect();

    let err = pipeline.process_batch(&batch).await.unwrap_err();
    assert!(matches!(err, PipelineError::StoreUnavailable(_)));

    // Work done before the failure stays stored.
    assert_eq!(store.inner.readings()?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn diagnosis_write_failure_keeps_reading_stored() -> Result<()> {
    // ---
    let store = Arc::new(FlakyStore::new());
    store.upserts_fail.store(true, Ordering::SeqCst);
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, notifier.clone());

    let summary = pipeline
        .process_batch(&[record(MAC_A, "2025-07-01 15:00:00", -40.0, 10.0, 15.0)])
        .await?;
    pipeline.flush_alerts().await;

    assert_eq!(summary.stored_count(), 1);
    assert!(!summary.stored[0].diagnosis_persisted);
    assert!(store.inner.diagnoses()?.is_empty());
    assert_eq!(notifier.taken()[0].level, AlertLevel::Error);

    // Reclassifying repairs it once writes succeed again.
    store.upserts_fail.store(false, Ordering::SeqCst);
    pipeline.reclassify(summary.stored[0].reading_id).await?;
    assert_eq!(store.inner.diagnoses()?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn model_failure_still_writes_error_diagnosis() -> Result<()> {
    // ---
    let store = seeded_store();
    let broken = Classifier::TrainedModel(ForestModel::from_json(
        r#"{ "feature_columns": ["jitter"], "trees": [ { "nodes": [ { "kind": "leaf", "label": "normal" } ] } ] }"#,
    )?);
    let pipeline = pipeline_with(store.clone(), broken, Arc::new(LogNotifier));

    let summary = pipeline
        .process_batch(&[record(MAC_A, "2025-07-01 16:00:00", -40.0, 10.0, 15.0)])
        .await?;

    assert_eq!(summary.stored_count(), 1);
    let diagnosis = store
        .find_by_reading(summary.stored[0].reading_id)
        .await?
        .unwrap();
    assert_eq!(diagnosis.problem_type, labels::CLASSIFICATION_ERROR);
    Ok(())
}

#[tokio::test]
async fn alerts_are_one_per_record_with_matching_levels() -> Result<()> {
    // ---
    let store = seeded_store();
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = pipeline_with(store, Classifier::FixedRuleFallback, notifier.clone());

    let batch = vec![
        record(MAC_A, "2025-07-01 17:00:00", -40.0, 10.0, 15.0),
        json!({ "sensor_mac": MAC_A, "rssi": "weak" }),
        record("FF:FF:FF:FF:FF:FF", "2025-07-01 17:00:00", -40.0, 10.0, 15.0),
        record(MAC_B, "2025-07-01 17:00:00", -65.0, 40.0, 8.0),
    ];
    pipeline.process_batch(&batch).await?;
    pipeline.flush_alerts().await;

    let alerts = notifier.taken();
    let levels: Vec<AlertLevel> = alerts.iter().map(|a| a.level).collect();
    assert_eq!(
        levels,
        vec![
            AlertLevel::Info,
            AlertLevel::Warning,
            AlertLevel::Warning,
            AlertLevel::Warning
        ]
    );
    assert_eq!(alerts[0].location, "Library 1F");
    assert_eq!(alerts[0].occurred_at_text(), "2025-07-01 17:00:00");
    assert_eq!(alerts[1].sensor, MAC_A);
    assert_eq!(alerts[2].sensor, "FF:FF:FF:FF:FF:FF");
    assert_eq!(alerts[3].reason, "prediction: router_issue");
    Ok(())
}

#[tokio::test]
async fn notifier_failures_do_not_change_the_outcome() -> Result<()> {
    // ---
    for hang in [false, true] {
        let store = seeded_store();
        let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(BrokenNotifier { hang }));

        let summary = pipeline
            .process_batch(&[
                record(MAC_A, "2025-07-01 18:00:00", -40.0, 10.0, 15.0),
                record("00:00:00:00:00:00", "2025-07-01 18:00:00", -40.0, 10.0, 15.0),
            ])
            .await?;

        assert_eq!(summary.stored_count(), 1, "hang={hang}");
        assert_eq!(store.diagnoses()?.len(), 1, "hang={hang}");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hanging_notifier_does_not_hold_up_the_batch() -> Result<()> {
    // ---
    let store = seeded_store();
    let pipeline = Pipeline::new(
        Stores::shared(store.clone()),
        Arc::new(Classifier::FixedRuleFallback),
        Arc::new(BrokenNotifier { hang: true }),
        PipelineOptions {
            notify_timeout: Duration::from_secs(5),
            alert_queue_capacity: 4,
            ..Default::default()
        },
    );

    let batch: Vec<_> = (0..6)
        .map(|i| record(MAC_A, &format!("2025-07-01 19:0{i}:00"), -40.0, 10.0, 15.0))
        .collect();

    let started = Instant::now();
    let summary = pipeline.process_batch(&batch).await?;
    let elapsed = started.elapsed();

    // Waiting on deliveries would take at least one notify_timeout per record.
    assert!(elapsed < Duration::from_secs(1), "batch took {elapsed:?}");
    assert_eq!(summary.stored_count(), 6);
    assert_eq!(store.readings()?.len(), 6);
    assert_eq!(store.diagnoses()?.len(), 6);
    Ok(())
}

#[tokio::test]
async fn overflowing_drop_rate_is_stored_unset() -> Result<()> {
    // ---
    let store = seeded_store();
    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(LogNotifier));

    let summary = pipeline
        .process_batch(&[
            record(MAC_A, "2025-07-01 20:00:00", -40.0, 10.0, 1e-300),
            record(MAC_A, "2025-07-01 20:01:00", -40.0, 10.0, -1e300),
        ])
        .await?;

    assert_eq!(summary.stored_count(), 2);
    assert_eq!(summary.stored[1].speed_drop_rate, None);
    assert!(summary.stored[1].diagnosis_persisted);

    let reading = store.find_by_id(summary.stored[1].reading_id).await?.unwrap();
    assert_eq!(reading.speed_drop_rate, None);
    Ok(())
}

#[tokio::test]
async fn empty_batch_stores_nothing() -> Result<()> {
    // ---
    let store = seeded_store();
    let pipeline = pipeline_with(store.clone(), Classifier::FixedRuleFallback, Arc::new(LogNotifier));

    let summary = pipeline.process_batch(&[]).await?;
    assert_eq!(summary.stored_count(), 0);
    assert!(summary.skipped.is_empty());
    assert!(store.readings()?.is_empty());
    Ok(())
}
