//! WiFi quality telemetry ingestion and diagnosis.
//!
//! Sensors submit batches of readings; each reading is validated, tied to a
//! registered sensor, enriched with a speed-drop-rate, stored, classified into
//! a problem type, and announced through a notifier. One bad record never
//! affects the others in its batch.
//!
//! This crate follows the Explicit Module Boundary Pattern (EMBP): modules
//! talk to each other through the re-exports below rather than reaching into
//! one another's internals, and the binary (`main.rs`) only wires together
//! `config`, `schema`, the stores and `routes`.

pub mod classifier;
pub mod config;
pub mod drop_rate;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod recompute;
pub mod routes;
pub mod schema;
pub mod store;
pub mod validate;

pub use classifier::{Classifier, Features};
pub use config::Config;
pub use models::{AlertEvent, AlertLevel, Diagnosis, Reading, ReadingView, Sensor};
pub use notifier::{LogNotifier, Notifier, SlackNotifier};
pub use pipeline::{BatchSummary, Pipeline, PipelineError, PipelineOptions, SkipReason, Stored};
pub use recompute::RecomputeSummary;
pub use store::{InMemoryStore, PgStore, StoreError, Stores};
