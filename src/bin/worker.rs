use pathogen_analysis::{
    config::AppConfig,
    db,
    services::{analysis::AnalysisEngine, queue::DispatchQueue},
    worker::Worker,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting pathogen analysis worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Workers have no HTTP router, so metrics get their own listener
    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(%addr, "Serving worker metrics");
    }

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let queue = DispatchQueue::new(&config.redis_url, config.task_result_ttl_secs)
        .expect("Failed to initialize dispatch queue");

    let scratch_dir = config.scratch_dir();
    let engine = AnalysisEngine::new(
        config.analysis_binary.clone(),
        scratch_dir.clone(),
        config.analysis_timeout(),
    );

    let worker = Worker::new(db_pool, queue, engine, config.mark_failed_on_error);
    let poll_interval = Duration::from_millis(config.worker_poll_interval_ms);
    let concurrency = config.worker_concurrency.max(1);

    tracing::info!(
        concurrency,
        binary = %config.analysis_binary.display(),
        scratch_dir = %scratch_dir.display(),
        mark_failed_on_error = config.mark_failed_on_error,
        "Worker ready, starting task processing loops"
    );

    let mut loops = JoinSet::new();
    loops.spawn(reclaim_loop(worker.queue.clone(), config.task_visibility_timeout()));
    for slot in 0..concurrency {
        loops.spawn(run_loop(worker.clone(), slot, poll_interval));
    }

    // Loops only end by panicking; keep the remaining ones alive.
    while let Some(joined) = loops.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Worker loop terminated unexpectedly");
        }
    }
}

/// Return tasks abandoned by dead workers to their lanes. Runs once at
/// startup and then every `visibility_timeout`.
async fn reclaim_loop(queue: Arc<DispatchQueue>, visibility_timeout: Duration) {
    let period = visibility_timeout.max(Duration::from_secs(1));
    loop {
        match queue.reclaim_stale(visibility_timeout).await {
            Ok(0) => {}
            Ok(requeued) => tracing::warn!(requeued, "Requeued stale in-flight tasks"),
            Err(e) => tracing::error!(error = %e, "Failed to reclaim stale tasks"),
        }
        sleep(period).await;
    }
}

/// Main processing loop for one concurrency slot.
async fn run_loop(worker: Worker, slot: usize, poll_interval: Duration) {
    loop {
        match worker.process_next_task().await {
            Ok(true) => {
                // Task processed, continue immediately
                tracing::debug!(slot, "Task processed, checking for next task");
            }
            Ok(false) => {
                // No task available, sleep before next poll
                tracing::trace!(slot, "No tasks available, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(slot, error = %e, "Error processing task, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}
