// src/routes/health.rs
//! Liveness endpoint for the WiFi diagnosis service.
//!
//! `GET /health` answers without touching the store or the notifier, so it
//! stays green while the database is down. It also reports which classifier
//! variant was selected at startup, which is the first thing to check when
//! diagnoses look like fallback-rule output.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::Pipeline;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    classifier: &'static str,
}

async fn health(State(pipeline): State<Arc<Pipeline>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        classifier: pipeline.classifier().name(),
    })
}

/// Subrouter with the single GET `/health` route.
pub fn router() -> Router<Arc<Pipeline>> {
    Router::new().route("/health", get(health))
}
