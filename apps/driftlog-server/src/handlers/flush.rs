//! Flush handler

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::info;

use crate::{
    dto::events::{CollectionFlush, FlushResponse},
    AppState,
};

/// Write every buffered batch now
#[utoipa::path(
    post,
    path = "/flush",
    responses(
        (status = 200, description = "All buffered batches stored", body = FlushResponse),
        (status = 503, description = "Some batches could not be stored", body = FlushResponse)
    ),
    tag = "storage"
)]
pub async fn flush_handler(State(state): State<AppState>) -> impl IntoResponse {
    let results = state.storage.flush_all().await;

    let collections: Vec<CollectionFlush> = results
        .into_iter()
        .map(|(collection, outcome)| CollectionFlush::new(collection, &outcome))
        .collect();

    let status = if collections.iter().all(CollectionFlush::is_ok) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    info!(collections = collections.len(), status = %status, "Flush requested");

    (status, Json(FlushResponse { collections }))
}
