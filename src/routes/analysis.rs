use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::error::{ApiError, ApiResult};
use crate::models::analysis::{AnalysisLookupParams, PendingPlaceholder, SubmitBody, SubmitResponse};
use crate::models::job::{format_timestamp, is_valid_patient_id, AnalysisJob, AnalysisResult, JobRecord};
use crate::models::task::DispatchTask;

const ALLOWED_SUBMIT_PARAMS: [&str; 3] = ["lab_id", "patient_id", "urgent"];

/// Check the query string of a submission, in order: required parameters,
/// lab membership, patient id format, no unexpected parameters.
pub fn validate_submit_params(
    params: &HashMap<String, String>,
    is_known_lab: impl Fn(&str) -> bool,
) -> ApiResult<(String, String, bool)> {
    let patient_id = params
        .get("patient_id")
        .ok_or_else(|| ApiError::validation("missing_patient_id"))?;
    let lab_id = params
        .get("lab_id")
        .ok_or_else(|| ApiError::validation("missing_lab_id"))?;

    if !is_known_lab(lab_id) {
        return Err(ApiError::validation("invalid_lab_id"));
    }
    if !is_valid_patient_id(patient_id) {
        return Err(ApiError::validation("invalid_patient_id"));
    }

    let mut unexpected: Vec<&str> = params
        .keys()
        .map(String::as_str)
        .filter(|k| !ALLOWED_SUBMIT_PARAMS.contains(k))
        .collect();
    if !unexpected.is_empty() {
        unexpected.sort_unstable();
        return Err(ApiError::validation_detail(
            "unexpected_parameter",
            format!("Unexpected query parameter(s): {}", unexpected.join(", ")),
        ));
    }

    let urgent = params
        .get("urgent")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    Ok((lab_id.clone(), patient_id.clone(), urgent))
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence == "application/json" || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// Check the body of a submission: JSON object holding only a string `image`.
pub fn validate_submit_body(headers: &HeaderMap, body: &[u8]) -> ApiResult<String> {
    if !is_json_content_type(headers) {
        return Err(ApiError::validation_detail(
            "invalid_content_type",
            "Request must be JSON",
        ));
    }

    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::validation_detail("invalid_request", format!("Malformed JSON body: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(ApiError::validation_detail("missing_image", "Missing image in request body"));
    };
    if !object.contains_key("image") {
        return Err(ApiError::validation_detail("missing_image", "Missing image in request body"));
    }

    let mut extra: Vec<&str> = object
        .keys()
        .map(String::as_str)
        .filter(|k| *k != "image")
        .collect();
    if !extra.is_empty() {
        extra.sort_unstable();
        return Err(ApiError::validation_detail(
            "invalid_request",
            format!(
                "Unexpected key(s) in request body: {}. Only 'image' is allowed.",
                extra.join(", ")
            ),
        ));
    }

    let body: SubmitBody = serde_json::from_value(value)
        .map_err(|_| ApiError::validation_detail("invalid_request", "'image' must be a base64 string"))?;
    Ok(body.image)
}

/// POST /api/v1/analysis submits an image for pathogen analysis.
///
/// Returns 201 as soon as the job row exists and the task is queued; the
/// analysis itself runs on a worker.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let labs = state.labs.valid_lab_ids().await;
    let (lab_id, patient_id, urgent) = validate_submit_params(&params, |lab| labs.contains(lab))?;
    let image = validate_submit_body(&headers, &body)?;

    let job = AnalysisJob::new_pending(lab_id, patient_id, urgent, Utc::now());
    queries::create_job(&state.db, &job, &labs).await?;

    let task = DispatchTask {
        patient_id: job.patient_id.clone(),
        lab_id: job.lab_id.clone(),
        image_payload: image,
        urgent: job.urgent,
        request_id: job.request_id,
    };

    let task_id = match state.queue.enqueue(&task).await {
        Ok(id) => id,
        Err(e) => {
            // Nothing will ever pick this job up; do not leave it pending.
            if let Err(store_err) =
                queries::update_result(&state.db, job.request_id, AnalysisResult::Failed, Utc::now()).await
            {
                tracing::error!(request_id = %job.request_id, error = %store_err, "Failed to mark unqueued job as failed");
            }
            return Err(e.into());
        }
    };

    metrics::counter!("analysis_jobs_submitted_total", "lane" => task.lane().as_str()).increment(1);
    tracing::info!(
        request_id = %job.request_id,
        task_id = %task_id,
        lab_id = %job.lab_id,
        urgent = job.urgent,
        "Analysis job submitted"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            id: job.request_id,
            task_id,
            created_at: format_timestamp(&job.created_at),
            updated_at: format_timestamp(&job.updated_at),
            status: AnalysisResult::Pending,
        }),
    ))
}

/// GET /api/v1/analysis?request_id= looks up one job.
///
/// A job the queue knows about but whose row is not visible yet is reported
/// as a pending placeholder.
pub async fn get_analysis(
    State(state): State<AppState>,
    Query(params): Query<AnalysisLookupParams>,
) -> ApiResult<Response> {
    let raw = params
        .request_id
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation("missing_request_id"))?;
    let request_id = Uuid::parse_str(&raw)
        .map_err(|_| ApiError::not_found("Invalid request_id format. It must be a valid UUIDv4."))?;

    if let Some(job) = queries::get_job(&state.db, request_id).await? {
        return Ok(Json(JobRecord::from(&job)).into_response());
    }

    if state.queue.task_for_request(request_id).await?.is_some() {
        return Ok(Json(PendingPlaceholder::new(request_id)).into_response());
    }

    Err(ApiError::not_found("Analysis not found"))
}

/// PUT /api/v1/analysis?request_id=&lab_id= reassigns a job to another lab.
pub async fn update_analysis_lab(
    State(state): State<AppState>,
    Query(params): Query<AnalysisLookupParams>,
) -> ApiResult<Json<JobRecord>> {
    let raw = params
        .request_id
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::not_found("Missing request_id parameter"))?;
    let request_id =
        Uuid::parse_str(&raw).map_err(|_| ApiError::not_found("Invalid request_id format"))?;

    if queries::get_job(&state.db, request_id).await?.is_none() {
        return Err(ApiError::not_found("Analysis job not found"));
    }

    let lab_id = params
        .lab_id
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation("missing_lab_id"))?;

    let labs = state.labs.valid_lab_ids().await;
    let job = queries::update_lab(&state.db, request_id, &lab_id, &labs, Utc::now()).await?;

    tracing::info!(request_id = %request_id, lab_id = %job.lab_id, "Analysis job lab updated");
    Ok(Json(JobRecord::from(&job)))
}
