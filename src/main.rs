//! Application entry point for the `wifi-diagnosis` service.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool with statement timeouts
//! - Creating the database schema if it does not exist
//! - Loading the classifier once (trained model or fixed-rule fallback)
//! - Choosing the alert notifier (Slack webhook or log only)
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! See [`wifi_diagnosis::config::load_from_env`] for the full list, plus:
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, io::IsTerminal, net::SocketAddr, str::FromStr, sync::Arc};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use wifi_diagnosis::{
    config, routes, schema, Classifier, LogNotifier, Notifier, PgStore, Pipeline, SlackNotifier,
    Stores,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!(
        "Attempting to connect to database: {}",
        config::mask_db_url(&cfg.db_url)
    );

    let connect_options = PgConnectOptions::from_str(&cfg.db_url)?.options([(
        "statement_timeout",
        cfg.db_statement_timeout.as_millis().to_string(),
    )]);

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .acquire_timeout(cfg.db_acquire_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to connect to database '{}': {}",
                config::mask_db_url(&cfg.db_url),
                e
            )
        })?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let classifier = Arc::new(Classifier::load(&cfg.model_path));
    tracing::info!("Classifier: {}", classifier.name());

    let notifier: Arc<dyn Notifier> = match &cfg.slack_webhook_url {
        Some(url) => Arc::new(SlackNotifier::new(url, cfg.notify_timeout)?),
        None => {
            tracing::warn!("SLACK_WEBHOOK_URL not set, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let pipeline = Arc::new(Pipeline::new(
        Stores::shared(Arc::new(PgStore::new(pool))),
        classifier,
        notifier,
        cfg.pipeline_options(),
    ));

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(pipeline);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `AXUM_LOG_LEVEL` env var
///
/// Called once at startup, before anything logs.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
