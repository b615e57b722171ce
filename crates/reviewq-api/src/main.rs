//! reviewq API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use reviewq_api::{router, ApiConfig, AppState};
use reviewq_core::{EventBroker, InMemoryEventBroker, TextExtractor};
use reviewq_db::{Database, FilesystemUploadStore, PoolConfig};
use reviewq_inference::{OpenAIBackend, OpenAIConfig};
use reviewq_jobs::{
    ChecklistGenerationHandler, PlainTextExtractor, QueueConfig, ReviewConfig, ReviewHandler,
    Stores, TaskQueue, WorkerBuilder, WorkerConfig,
};

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "reviewq_api=debug,reviewq_jobs=info,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "reviewq_api=debug,reviewq_jobs=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("reviewq-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let config = ApiConfig::from_env();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool_config = PoolConfig::from_env();
    info!(max_connections = pool_config.max_connections, "Connecting to database");
    let db = Database::connect_with_config(&database_url, pool_config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    info!("Database ready");

    let uploads = FilesystemUploadStore::new(&config.upload_dir);
    if let Err(e) = uploads.validate().await {
        anyhow::bail!("Upload directory {} is not usable: {}", config.upload_dir, e);
    }
    let stores = Stores::from_database(&db, Arc::new(uploads));

    let review_config = ReviewConfig::from_env();
    let backend = Arc::new(OpenAIBackend::new(
        OpenAIConfig::from_env().with_evaluation_labels(review_config.evaluation_labels.clone()),
    )?);
    info!(
        base_url = %backend.config().base_url,
        model = %backend.config().gen_model,
        "Model backend configured"
    );

    let broker: Arc<dyn EventBroker> = Arc::new(InMemoryEventBroker::new());
    let queue = Arc::new(
        TaskQueue::new(stores.clone(), broker.clone(), QueueConfig::from_env())
            .with_review_config(review_config.clone()),
    );

    let extractor: Arc<dyn TextExtractor> = Arc::new(PlainTextExtractor);
    let worker_config = WorkerConfig::from_env();
    info!(
        enabled = worker_config.enabled,
        workers = worker_config.worker_count,
        max_parallel_credentials = worker_config.gate.max_parallel_credentials,
        "Starting worker pool"
    );
    let pool = WorkerBuilder::new(stores.clone(), broker.clone(), queue.clone())
        .with_config(worker_config)
        .with_handler(ChecklistGenerationHandler::new(
            stores.clone(),
            broker.clone(),
            extractor.clone(),
            backend.clone(),
        ))
        .with_handler(ReviewHandler::new(
            stores.clone(),
            broker.clone(),
            extractor,
            backend.clone(),
            review_config.clone(),
        ))
        .build()
        .await;
    let workers = pool.start();

    let state = AppState::new(stores, broker, queue, backend, review_config)
        .with_keepalive(config.keepalive);
    let app = router(state, &config);

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, draining workers");
    workers.shutdown_and_wait().await?;
    Ok(())
}
