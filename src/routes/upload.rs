// src/routes/upload.rs
//! `POST /upload`: batch ingestion.
//!
//! The body is a JSON array of raw sensor records. The response only carries
//! the number of stored records; per-record outcomes live in the log and in
//! alerts so constrained sensor clients get a fixed, tiny contract.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use crate::Pipeline;

// ---

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub stored: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: &'static str,
}

pub fn router() -> Router<Arc<Pipeline>> {
    // ---
    Router::new().route("/upload", post(handler))
}

async fn handler(
    State(pipeline): State<Arc<Pipeline>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    // ---
    let Some(records) = body.as_array() else {
        info!("POST /upload - body is not a list, rejecting");
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                status: "error",
                message: "request body must be a list of readings",
            }),
        )
            .into_response();
    };

    info!("POST /upload - {} records received", records.len());

    match pipeline.process_batch(records).await {
        Ok(summary) => {
            let stored = summary.stored_count();
            (
                StatusCode::OK,
                Json(UploadResponse {
                    status: "success",
                    stored,
                    message: format!("{stored} readings stored and diagnosed"),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("POST /upload - batch aborted: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    status: "error",
                    message: "internal server error",
                }),
            )
                .into_response()
        }
    }
}
