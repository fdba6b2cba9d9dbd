//! Event ingestion handler

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use driftlog_domain::IngestionError;
use tracing::info;

use crate::{
    dto::events::{ErrorResponse, IngestRequest, IngestResponse},
    AppState,
};

/// Handle ingestion requests
#[utoipa::path(
    post,
    path = "/events",
    request_body = IngestRequest,
    responses(
        (status = 201, description = "Event handed to the channel", body = IngestResponse),
        (status = 400, description = "Bad request - invalid event", body = ErrorResponse),
        (status = 422, description = "Payload has no canonical form", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
        (status = 502, description = "Channel rejected the event", body = ErrorResponse),
        (status = 503, description = "Channel unavailable, retries exhausted", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn ingest_handler(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> impl IntoResponse {
    info!(source = %request.source, event_type = %request.event_type, "Received ingest request");

    match state.ingestion.ingest_event(request.into()).await {
        Ok(event_id) => (
            StatusCode::CREATED,
            Json(IngestResponse {
                event_id: event_id.to_string(),
                message: "Event accepted".to_string(),
            }),
        )
            .into_response(),
        // The service already logged the failure at the right level
        Err(err) => (
            status_for(&err),
            Json(ErrorResponse {
                error: err.to_string(),
                event_id: err.event_id().map(ToString::to_string),
            }),
        )
            .into_response(),
    }
}

/// HTTP status reported for an ingestion error
pub fn status_for(err: &IngestionError) -> StatusCode {
    match err {
        IngestionError::Validation(_) => StatusCode::BAD_REQUEST,
        IngestionError::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
        IngestionError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        IngestionError::RetryExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        IngestionError::IngestionFailure { .. } => StatusCode::BAD_GATEWAY,
    }
}
