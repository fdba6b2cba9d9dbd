//! Driftlog - Event ingestion and storage server
//!
//! HTTP front for producers plus the storage sink. Events are validated and
//! published to the in-process channel; the sink consumes the channel and
//! writes batches of documents to S3.

mod config;
mod dto;
mod handlers;
mod routes;
mod sink;

use std::sync::Arc;

use anyhow::{Context, Result};
use driftlog_channel::InProcessBroker;
use driftlog_domain::{IngestionService, StorageService};
use driftlog_s3::infrastructure::S3DocumentStore;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::sink::Sink;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<IngestionService<InProcessBroker>>,
    pub storage: Arc<StorageService<S3DocumentStore>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Driftlog server");

    let settings = Settings::from_env().context("Invalid configuration")?;

    // Initialize AWS S3 client with MinIO-compatible configuration
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

    // Configure S3 client with path-style addressing for MinIO compatibility
    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true) // Required for MinIO
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);

    let store = S3DocumentStore::new(
        s3_client,
        settings.bucket.clone(),
        settings.namespace.clone(),
    )
    .with_max_in_flight(settings.max_in_flight);

    info!(
        bucket = %store.bucket(),
        namespace = %store.namespace(),
        max_in_flight = settings.max_in_flight,
        "S3 document store ready"
    );
    let storage = Arc::new(StorageService::new(store, settings.storage_config()));

    // Channel between the HTTP front and the sink
    let broker = InProcessBroker::new(settings.channel_capacity);
    let subscription = broker
        .subscribe_prefix(settings.topic_prefix.clone())
        .await
        .context("Failed to subscribe the sink to the channel")?;

    let ingestion = Arc::new(IngestionService::new(
        broker.clone(),
        settings.ingestion_config(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sink = Sink::new(
        Arc::clone(&storage),
        settings.topic_prefix.clone(),
        settings.flush_interval,
    );
    let sink_task = tokio::spawn(sink.run(subscription, shutdown_rx));

    // Create shared application state
    let state = AppState { ingestion, storage };

    // Build HTTP router
    let app = routes::create_router(state);

    let addr = settings.bind_addr();
    info!(addr = %addr, "Starting HTTP server");

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped, flushing pending events");

    // The sink may already be gone if the channel closed
    shutdown_tx.send(true).ok();
    broker.close().await;
    sink_task.await.context("Sink worker panicked")?;

    info!("Driftlog server stopped");

    Ok(())
}

/// Initialize tracing from `RUST_LOG` (default `info`) and `LOG_FORMAT`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
