//! Configuration loader for the `wifi-diagnosis` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::pipeline::PipelineOptions;

/// Parse an optional unsigned integer environment variable with a default value.
macro_rules! parse_env_num {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// How long to wait for a pooled connection before declaring the store gone.
    pub db_acquire_timeout: Duration,

    /// Server-side `statement_timeout` applied to every connection.
    pub db_statement_timeout: Duration,

    /// HTTP listen port.
    pub listen_port: u16,

    /// Trained model artifact; the fallback rules are used if it cannot be loaded.
    pub model_path: PathBuf,

    /// Slack incoming webhook. Alerts only go to the log when unset.
    pub slack_webhook_url: Option<String>,

    /// Upper bound on a single alert delivery.
    pub notify_timeout: Duration,

    /// Alerts allowed to wait for delivery before new ones are dropped.
    pub alert_queue_capacity: usize,

    /// Maximum pending readings scanned per recompute run.
    pub recompute_batch_limit: i64,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `DB_ACQUIRE_TIMEOUT_SECS` – pool acquire timeout (default: 5)
/// - `DB_STATEMENT_TIMEOUT_MS` – per-statement timeout (default: 5000)
/// - `LISTEN_PORT` – HTTP port (default: 8080)
/// - `MODEL_PATH` – model artifact (default: `models/random_forest_model.json`)
/// - `SLACK_WEBHOOK_URL` – alert webhook (default: unset, log only)
/// - `NOTIFY_TIMEOUT_SECS` – alert delivery timeout (default: 10)
/// - `ALERT_QUEUE_CAPACITY` – queued alerts before dropping (default: 1024)
/// - `RECOMPUTE_BATCH_LIMIT` – pending readings per recompute (default: 10000)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_num!("DB_POOL_MAX", u32, 5);
    let db_acquire_timeout = Duration::from_secs(parse_env_num!("DB_ACQUIRE_TIMEOUT_SECS", u64, 5));
    let db_statement_timeout =
        Duration::from_millis(parse_env_num!("DB_STATEMENT_TIMEOUT_MS", u64, 5000));
    let listen_port = parse_env_num!("LISTEN_PORT", u16, 8080);
    let model_path = env::var("MODEL_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("models/random_forest_model.json"));
    let slack_webhook_url = env::var("SLACK_WEBHOOK_URL")
        .ok()
        .filter(|v| !v.trim().is_empty());
    let notify_timeout = Duration::from_secs(parse_env_num!("NOTIFY_TIMEOUT_SECS", u64, 10));
    let alert_queue_capacity = parse_env_num!("ALERT_QUEUE_CAPACITY", usize, 1024);
    let recompute_batch_limit = parse_env_num!("RECOMPUTE_BATCH_LIMIT", u32, 10_000) as i64;

    if db_pool_max == 0 {
        return Err(anyhow!("DB_POOL_MAX must be at least 1"));
    }
    if alert_queue_capacity == 0 {
        return Err(anyhow!("ALERT_QUEUE_CAPACITY must be at least 1"));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        db_acquire_timeout,
        db_statement_timeout,
        listen_port,
        model_path,
        slack_webhook_url,
        notify_timeout,
        alert_queue_capacity,
        recompute_batch_limit,
    })
}

impl Config {
    /// Pipeline tunables derived from this configuration.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            notify_timeout: self.notify_timeout,
            alert_queue_capacity: self.alert_queue_capacity,
            recompute_batch_limit: self.recompute_batch_limit,
        }
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords and the webhook
    /// token while showing all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let webhook = if self.slack_webhook_url.is_some() {
            "(set)"
        } else {
            "(unset, alerts logged only)"
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL            : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX             : {}", self.db_pool_max);
        tracing::info!("  DB_ACQUIRE_TIMEOUT_SECS : {}", self.db_acquire_timeout.as_secs());
        tracing::info!("  DB_STATEMENT_TIMEOUT_MS : {}", self.db_statement_timeout.as_millis());
        tracing::info!("  LISTEN_PORT             : {}", self.listen_port);
        tracing::info!("  MODEL_PATH              : {}", self.model_path.display());
        tracing::info!("  SLACK_WEBHOOK_URL       : {}", webhook);
        tracing::info!("  NOTIFY_TIMEOUT_SECS     : {}", self.notify_timeout.as_secs());
        tracing::info!("  ALERT_QUEUE_CAPACITY    : {}", self.alert_queue_capacity);
        tracing::info!("  RECOMPUTE_BATCH_LIMIT   : {}", self.recompute_batch_limit);
    }
}

/// Mask the password in a database URL.
pub fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // Only a colon after the scheme separator belongs to the credentials.
            if db_url[..colon_pos].contains("//") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}
