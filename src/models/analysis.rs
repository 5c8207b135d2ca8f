use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{AnalysisResult, ResultCounts};

/// Body of `POST /api/v1/analysis`. Only `image` is accepted.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitBody {
    pub image: String,
}

/// Response after submitting an image for analysis.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    /// Handle for the task status endpoints.
    pub task_id: Uuid,
    pub created_at: String,
    pub updated_at: String,
    pub status: AnalysisResult,
}

/// Returned by `GET /api/v1/analysis` when the job row does not exist yet
/// but the dispatch queue knows about the request.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingPlaceholder {
    pub request_id: Uuid,
    pub lab_id: Option<String>,
    pub patient_id: Option<String>,
    pub result: AnalysisResult,
    pub urgent: Option<bool>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl PendingPlaceholder {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            lab_id: None,
            patient_id: None,
            result: AnalysisResult::Pending,
            urgent: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Response for `GET /api/v1/labs/results/{lab_id}/summary`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LabSummary {
    pub lab_id: String,
    #[serde(flatten)]
    pub counts: ResultCounts,
    pub generated_at: String,
}

/// Raw query string of `GET /api/v1/labs/results/{lab_id}`.
///
/// Everything arrives as text so that each field gets its own error message.
#[derive(Debug, Default, Deserialize)]
pub struct LabResultsParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub patient_id: Option<String>,
    pub result: Option<String>,
    pub urgent: Option<String>,
}

/// Raw query string of `GET /api/v1/patients/results`.
#[derive(Debug, Default, Deserialize)]
pub struct PatientResultsParams {
    pub patient_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub status: Option<String>,
    pub urgent: Option<String>,
}

/// Raw query string of the lab summary endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct SummaryParams {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Raw query string of `GET`/`PUT /api/v1/analysis`.
#[derive(Debug, Default, Deserialize)]
pub struct AnalysisLookupParams {
    pub request_id: Option<String>,
    pub lab_id: Option<String>,
}
