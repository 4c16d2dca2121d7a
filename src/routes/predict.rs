// src/routes/predict.rs
//! `POST /predict`: manual reclassification of a stored reading, e.g. after a
//! model upgrade. Overwrites the existing diagnosis in place.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::{Pipeline, PipelineError};

// ---

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub reading_id: i64,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub status: &'static str,
    pub reading_id: i64,
    pub predicted_problem_type: String,
}

pub fn router() -> Router<Arc<Pipeline>> {
    // ---
    Router::new().route("/predict", post(handler))
}

async fn handler(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<PredictRequest>,
) -> impl IntoResponse {
    // ---
    match pipeline.reclassify(req.reading_id).await {
        Ok(done) => (
            StatusCode::OK,
            Json(PredictResponse {
                status: "success",
                reading_id: done.reading_id,
                predicted_problem_type: done.problem_type,
            }),
        )
            .into_response(),
        Err(PipelineError::ReadingNotFound(id)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "error", "message": format!("reading {id} not found") })),
        )
            .into_response(),
        Err(e) => {
            error!("POST /predict - reclassify {} failed: {}", req.reading_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": "prediction failed" })),
            )
                .into_response()
        }
    }
}
