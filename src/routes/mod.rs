pub mod analysis;
pub mod filters;
pub mod health;
pub mod labs;
pub mod metrics;
pub mod patients;
pub mod tasks;

use axum::routing::get;
use axum::Router;

use crate::app_state::AppState;

/// Health and `/api/v1` routes, without middleware.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health::api_health))
        .route(
            "/analysis",
            get(analysis::get_analysis)
                .post(analysis::submit_analysis)
                .put(analysis::update_analysis_lab),
        )
        .route("/todos/ical/{task_id}/status", get(tasks::get_task_status))
        .route("/todos/ical/{task_id}/result", get(tasks::get_task_result))
        .route("/labs", get(labs::list_labs))
        .route("/labs/results/{lab_id}", get(labs::get_lab_results))
        .route("/labs/results/{lab_id}/summary", get(labs::get_lab_summary))
        .route("/patients/results", get(patients::get_patient_results));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1", api)
        .with_state(state)
}
