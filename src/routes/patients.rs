use axum::extract::{Query, State};
use axum::Json;

use crate::app_state::AppState;
use crate::db::queries;
use crate::error::ApiResult;
use crate::models::analysis::PatientResultsParams;
use crate::models::job::JobRecord;
use crate::routes::filters;

/// GET /api/v1/patients/results: every job for one patient, oldest first.
pub async fn get_patient_results(
    State(state): State<AppState>,
    Query(params): Query<PatientResultsParams>,
) -> ApiResult<Json<Vec<JobRecord>>> {
    let filter = filters::patient_results_filter(&params)?;
    let jobs = queries::query_jobs(&state.db, &filter, 0, None).await?;
    Ok(Json(jobs.iter().map(JobRecord::from).collect()))
}
