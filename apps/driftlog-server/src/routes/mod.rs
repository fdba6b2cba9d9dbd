//! API routes

pub mod events;

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    dto::events::{CollectionFlush, ErrorResponse, FlushResponse, IngestRequest, IngestResponse},
    handlers, AppState,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::events::ingest_handler,
        handlers::flush::flush_handler,
        health_handler
    ),
    components(
        schemas(IngestRequest, IngestResponse, CollectionFlush, FlushResponse, ErrorResponse)
    ),
    tags(
        (name = "events", description = "Event ingestion endpoints"),
        (name = "storage", description = "Batch storage endpoints"),
        (name = "health", description = "Health check endpoints")
    ),
    info(
        title = "Driftlog API",
        version = "0.1.0",
        description = "Real-time event ingestion and storage pipeline",
        contact(
            name = "Driftlog Team"
        )
    )
)]
pub struct ApiDoc;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(events::routes())
        .route("/health", axum::routing::get(health_handler))
        .with_state(state)
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = String)
    ),
    tag = "health"
)]
async fn health_handler() -> &'static str {
    "OK"
}
