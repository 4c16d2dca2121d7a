//! Alert delivery.
//!
//! Notifiers are best-effort: errors are logged and dropped, never retried.
//! Retry policy, if any, belongs to the notifier. The pipeline never calls a
//! notifier directly; it hands alerts to an [`AlertDispatcher`], whose single
//! background task delivers them in submission order.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::models::{AlertEvent, AlertLevel};

// ---

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &AlertEvent) -> Result<(), NotifyError>;

    /// Name for logging.
    fn notifier_name(&self) -> &'static str;
}

/// Writes alerts to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &AlertEvent) -> Result<(), NotifyError> {
        // ---
        let occurred_at = alert.occurred_at_text();
        match alert.level {
            AlertLevel::Info => info!(
                sensor = %alert.sensor, location = %alert.location, %occurred_at,
                "ALERT {}", alert.reason
            ),
            AlertLevel::Warning => warn!(
                sensor = %alert.sensor, location = %alert.location, %occurred_at,
                "ALERT {}", alert.reason
            ),
            AlertLevel::Error => error!(
                sensor = %alert.sensor, location = %alert.location, %occurred_at,
                "ALERT {}", alert.reason
            ),
        }
        Ok(())
    }

    fn notifier_name(&self) -> &'static str {
        "log"
    }
}

/// Posts alerts to a Slack incoming webhook.
#[derive(Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    // ---
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        // ---
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            webhook_url: webhook_url.to_string(),
        })
    }
}

/// Attachment colour per level.
fn level_color(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Error => "#ff0000",
        AlertLevel::Warning => "#ffbf00",
        AlertLevel::Info => "#36a64f",
    }
}

/// Build the Slack message body for an alert.
pub fn slack_payload(alert: &AlertEvent) -> serde_json::Value {
    // ---
    let occurred_at = alert.occurred_at_text();
    let text = format!(
        "[WiFi Diagnosis Alert - {}]\n\
         • Sensor: `{}`\n\
         • Location: `{}`\n\
         • Reason: `{}`\n\
         • Occurred at: `{}`",
        alert.level, alert.sensor, alert.location, alert.reason, occurred_at
    );

    json!({
        "text": text,
        "attachments": [{
            "color": level_color(alert.level),
            "fields": [
                { "title": "Sensor", "value": alert.sensor, "short": true },
                { "title": "Location", "value": alert.location, "short": true },
                { "title": "Reason", "value": alert.reason, "short": false },
                { "title": "Occurred at", "value": occurred_at, "short": true },
                { "title": "Level", "value": alert.level.as_str(), "short": true }
            ],
            "footer": "WiFi Diagnosis System"
        }]
    })
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, alert: &AlertEvent) -> Result<(), NotifyError> {
        // ---
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&slack_payload(alert))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status()));
        }

        debug!(level = %alert.level, sensor = %alert.sensor, "Slack alert delivered");
        Ok(())
    }

    fn notifier_name(&self) -> &'static str {
        "slack"
    }
}

// ---

enum Dispatch {
    Alert(AlertEvent),
    Flush(oneshot::Sender<()>),
}

/// Bounded alert queue in front of a [`Notifier`].
///
/// [`dispatch`](Self::dispatch) never waits: when the queue is full the alert
/// is logged and dropped. Each delivery is bounded by `timeout`, so a hung
/// webhook delays later alerts but never the caller. The background task ends
/// once every handle has been dropped.
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<Dispatch>,
    notifier_name: &'static str,
}

impl AlertDispatcher {
    // ---
    /// Start the delivery task. Must be called from within a Tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize, timeout: Duration) -> Self {
        // ---
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let notifier_name = notifier.notifier_name();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    Dispatch::Alert(alert) => deliver(notifier.as_ref(), &alert, timeout).await,
                    Dispatch::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!(notifier = notifier_name, "Alert dispatcher stopped");
        });

        Self { tx, notifier_name }
    }

    /// Queue an alert without waiting for delivery.
    pub fn dispatch(&self, alert: AlertEvent) {
        // ---
        let (cause, msg) = match self.tx.try_send(Dispatch::Alert(alert)) {
            Ok(()) => return,
            Err(TrySendError::Full(msg)) => ("queue full", msg),
            Err(TrySendError::Closed(msg)) => ("dispatcher stopped", msg),
        };
        if let Dispatch::Alert(alert) = msg {
            warn!(
                notifier = self.notifier_name,
                sensor = %alert.sensor,
                level = %alert.level,
                cause,
                "Alert dropped"
            );
        }
    }

    /// Wait until every alert queued before this call has been handled.
    pub async fn flush(&self) {
        // ---
        let (done, handled) = oneshot::channel();
        if self.tx.send(Dispatch::Flush(done)).await.is_ok() {
            let _ = handled.await;
        }
    }
}

async fn deliver(notifier: &dyn Notifier, alert: &AlertEvent, timeout: Duration) {
    // ---
    let result = match tokio::time::timeout(timeout, notifier.notify(alert)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout(timeout)),
    };

    if let Err(e) = result {
        error!(
            notifier = notifier.notifier_name(),
            sensor = %alert.sensor,
            level = %alert.level,
            error = %e,
            "Alert delivery failed"
        );
    }
}
