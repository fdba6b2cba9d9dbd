//! Event routes

use axum::{routing::post, Router};

use crate::{
    handlers::{events::ingest_handler, flush::flush_handler},
    AppState,
};

/// Create event and storage routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(ingest_handler))
        .route("/flush", post(flush_handler))
}
