use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::app_state::AppState;
use crate::models::task::Lane;

/// Prometheus metrics scrape endpoint.
/// Refreshes the queue depth gauges, then renders the text exposition format.
pub async fn prometheus_metrics(
    State((state, handle)): State<(AppState, Arc<PrometheusHandle>)>,
) -> impl IntoResponse {
    for lane in Lane::PRIORITY_ORDER {
        match state.queue.queue_depth(lane).await {
            Ok(depth) => {
                metrics::gauge!("analysis_queue_depth", "lane" => lane.as_str()).set(depth as f64);
            }
            Err(e) => tracing::warn!(lane = %lane, error = %e, "Could not read queue depth"),
        }
    }
    handle.render()
}
