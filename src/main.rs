use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pathogen_analysis::{
    app_state::AppState,
    config::AppConfig,
    db, routes,
    services::{lab_directory::LabDirectory, queue::DispatchQueue},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing pathogen-analysis server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "analysis_jobs_submitted_total",
        "Total analysis jobs submitted, by lane"
    );
    metrics::describe_counter!(
        "analysis_jobs_completed_total",
        "Total analysis tasks completed, by result"
    );
    metrics::describe_counter!(
        "analysis_jobs_failed_total",
        "Total analysis tasks that failed"
    );
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Time spent running the external analysis program"
    );
    metrics::describe_gauge!(
        "analysis_queue_depth",
        "Current number of queued tasks, by lane"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis dispatch queue
    tracing::info!("Connecting to Redis dispatch queue");
    let queue = DispatchQueue::new(&config.redis_url, config.task_result_ttl_secs)
        .expect("Failed to initialize dispatch queue");

    // Load the lab allow-list once up front; later reads refresh on TTL
    tracing::info!(url = %config.lab_list_url, "Loading lab directory");
    let labs = LabDirectory::new(&config.lab_list_url, config.lab_refresh_interval())
        .expect("Failed to initialize lab directory client");
    labs.refresh().await;

    // Create shared application state
    let state = AppState::new(db_pool, queue, labs);

    // Build API routes
    let app = routes::router(state.clone())
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state((state, prometheus_handle)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        // Base64 images exceed axum's 2 MB default; the tower limit applies instead
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    tracing::info!("Starting pathogen-analysis on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
