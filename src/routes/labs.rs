use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;

use crate::app_state::AppState;
use crate::db::queries;
use crate::error::{ApiError, ApiResult};
use crate::models::analysis::{LabResultsParams, LabSummary, SummaryParams};
use crate::models::job::{format_timestamp, JobFilter, JobRecord};
use crate::routes::filters;

/// GET /api/v1/labs: labs that have submitted at least one job.
pub async fn list_labs(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(queries::distinct_lab_ids(&state.db).await?))
}

/// GET /api/v1/labs/results/{lab_id}
///
/// Filtered, paged job listing for one lab, oldest first. An offset past
/// the end yields an empty list.
pub async fn get_lab_results(
    State(state): State<AppState>,
    Path(lab_id): Path<String>,
    Query(params): Query<LabResultsParams>,
) -> ApiResult<Json<Vec<JobRecord>>> {
    if !state.labs.contains(&lab_id).await {
        tracing::debug!(lab_id = %lab_id, "Lab results requested for unknown lab");
        return Err(ApiError::not_found("invalid_lab_id"));
    }

    let query = filters::lab_results_query(&lab_id, &params)?;
    tracing::debug!(lab_id = %lab_id, ?query, "Lab results query validated");

    let total = queries::count_jobs(&state.db, &query.filter).await?;
    if query.offset >= total {
        return Ok(Json(Vec::new()));
    }

    let jobs = queries::query_jobs(&state.db, &query.filter, query.offset, Some(query.limit)).await?;
    Ok(Json(jobs.iter().map(JobRecord::from).collect()))
}

/// GET /api/v1/labs/results/{lab_id}/summary
pub async fn get_lab_summary(
    State(state): State<AppState>,
    Path(lab_id): Path<String>,
    Query(params): Query<SummaryParams>,
) -> ApiResult<Json<LabSummary>> {
    if !state.labs.contains(&lab_id).await {
        return Err(ApiError::not_found("Lab ID not found in the list of valid lab IDs"));
    }

    let (created_from, created_to) = filters::parse_range(&params.start, &params.end)?;

    let lab_only = JobFilter {
        lab_id: Some(lab_id.clone()),
        ..Default::default()
    };
    if queries::count_jobs(&state.db, &lab_only).await? == 0 {
        return Err(ApiError::not_found("Lab ID not found"));
    }

    let filter = JobFilter {
        created_from,
        created_to,
        ..lab_only
    };
    let counts = queries::summarize_jobs(&state.db, &filter).await?;
    if counts.total() == 0 {
        return Err(ApiError::not_found(
            "No analysis jobs for this lab in the requested period",
        ));
    }

    Ok(Json(LabSummary {
        lab_id,
        counts,
        generated_at: format_timestamp(&Utc::now()),
    }))
}
