//! HTTP gateway (EMBP): each sibling module exports a subrouter and this
//! module merges them and attaches the shared pipeline state.

use axum::Router;
use std::sync::Arc;

use crate::Pipeline;

mod health;
mod maintenance;
mod predict;
mod readings;
mod upload;

// ---

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    // ---
    Router::new()
        .merge(upload::router())
        .merge(readings::router())
        .merge(predict::router())
        .merge(maintenance::router())
        .merge(health::router())
        .with_state(pipeline)
}
