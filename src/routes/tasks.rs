use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::task::TaskStatusResponse;

fn parse_task_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found("Task not found"))
}

/// Absolute result URL when the request carries a `Host`, otherwise a path.
fn result_url(headers: &HeaderMap, task_id: Uuid) -> String {
    let path = format!("/api/v1/todos/ical/{task_id}/result");
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return path;
    };
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}{path}")
}

/// GET /api/v1/todos/ical/{task_id}/status
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<TaskStatusResponse>> {
    let task_id = parse_task_id(&task_id)?;
    let task_status = state
        .queue
        .get_status(task_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Task not found"))?;

    Ok(Json(TaskStatusResponse {
        task_id,
        task_status,
        result_url: result_url(&headers, task_id),
    }))
}

/// GET /api/v1/todos/ical/{task_id}/result
///
/// The payload exists only once the task has succeeded.
pub async fn get_task_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let task_id = parse_task_id(&task_id)?;
    state
        .queue
        .get_result(task_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Task not finished"))
}
