// src/routes/readings.rs
//! `GET /readings`: the most recent readings joined with sensor location and
//! the stored diagnosis, newest first. `limit` defaults to 10 and is clamped
//! to 1..=1000.

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

use crate::{Pipeline, ReadingView};

// ---

const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 1000;

pub fn router() -> Router<Arc<Pipeline>> {
    // ---
    Router::new().route("/readings", get(handler))
}

/// Query parameters for `GET /readings`
#[derive(Debug, Deserialize)]
pub struct ReadingsQuery {
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ReadingsResponse {
    status: &'static str,
    data: Vec<ReadingView>,
}

/// Most recent readings joined with sensor location, newest first.
async fn handler(
    Query(params): Query<ReadingsQuery>,
    State(pipeline): State<Arc<Pipeline>>,
) -> impl IntoResponse {
    // ---
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    debug!("GET /readings - limit {}", limit);

    match pipeline.recent_readings(i64::from(limit)).await {
        Ok(data) => (
            StatusCode::OK,
            Json(ReadingsResponse {
                status: "success",
                data,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("GET /readings - query failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "message": "database error" })),
            )
                .into_response()
        }
    }
}
