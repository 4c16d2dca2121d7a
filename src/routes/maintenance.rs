// src/routes/maintenance.rs
//! `POST /maintenance/recompute`: backfill pending speed drop rates.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::Pipeline;

// ---

pub fn router() -> Router<Arc<Pipeline>> {
    // ---
    Router::new().route("/maintenance/recompute", post(handler))
}

async fn handler(State(pipeline): State<Arc<Pipeline>>) -> impl IntoResponse {
    // ---
    info!("POST /maintenance/recompute - starting");

    match pipeline.recompute_pending().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "summary": summary })),
        )
            .into_response(),
        Err(e) => {
            error!("POST /maintenance/recompute - aborted: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": "recompute failed" })),
            )
                .into_response()
        }
    }
}
