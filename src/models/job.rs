use chrono::{DateTime, SecondsFormat, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Classification of an analysis job.
///
/// Every job starts as `Pending` and moves once to a terminal value when
/// the worker finishes (or to `Failed` when the worker hits an error and
/// failure marking is enabled).
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AnalysisResult {
    Pending,
    Covid,
    H5n1,
    Healthy,
    Failed,
}

impl AnalysisResult {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Context for model validation: the lab allow-list at creation time.
#[derive(Debug, Default)]
pub struct LabAllowList(pub HashSet<String>);

/// A persisted analysis job, one per submitted request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[garde(context(LabAllowList))]
pub struct AnalysisJob {
    #[garde(skip)]
    pub request_id: Uuid,

    #[garde(custom(is_allowed_lab))]
    pub lab_id: String,

    #[garde(custom(is_patient_id))]
    pub patient_id: String,

    #[garde(skip)]
    pub result: AnalysisResult,

    #[garde(skip)]
    pub urgent: bool,

    #[garde(skip)]
    pub created_at: DateTime<Utc>,

    #[garde(custom(not_before_created_at(&self.created_at)))]
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    /// Build a fresh `pending` job stamped with `now`.
    pub fn new_pending(lab_id: String, patient_id: String, urgent: bool, now: DateTime<Utc>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            lab_id,
            patient_id,
            result: AnalysisResult::Pending,
            urgent,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Returns true when `value` is an 11-digit national patient identifier.
pub fn is_valid_patient_id(value: &str) -> bool {
    value.len() == 11 && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_patient_id(value: &str, _ctx: &LabAllowList) -> garde::Result {
    if is_valid_patient_id(value) {
        Ok(())
    } else {
        Err(garde::Error::new("patient_id must be exactly 11 digits"))
    }
}

fn is_allowed_lab(value: &str, ctx: &LabAllowList) -> garde::Result {
    if ctx.0.contains(value) {
        Ok(())
    } else {
        Err(garde::Error::new(format!("lab_id {value} is not in the lab directory")))
    }
}

fn not_before_created_at(
    created_at: &DateTime<Utc>,
) -> impl FnOnce(&DateTime<Utc>, &LabAllowList) -> garde::Result + '_ {
    move |updated_at, _ctx| {
        if updated_at >= created_at {
            Ok(())
        } else {
            Err(garde::Error::new("updated_at precedes created_at"))
        }
    }
}

/// Timestamp rendering used across the API: RFC 3339, whole seconds, `Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Public JSON shape of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub request_id: Uuid,
    pub lab_id: String,
    pub patient_id: String,
    pub result: AnalysisResult,
    pub urgent: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&AnalysisJob> for JobRecord {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            request_id: job.request_id,
            lab_id: job.lab_id.clone(),
            patient_id: job.patient_id.clone(),
            result: job.result,
            urgent: job.urgent,
            created_at: format_timestamp(&job.created_at),
            updated_at: format_timestamp(&job.updated_at),
        }
    }
}

/// Conjunctive filter over the job table. `None` fields are unconstrained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub lab_id: Option<String>,
    pub patient_id: Option<String>,
    pub result: Option<AnalysisResult>,
    pub urgent: Option<bool>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

/// Per-category counts for one lab over a date range.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultCounts {
    pub pending: i64,
    pub covid: i64,
    pub h5n1: i64,
    pub healthy: i64,
    pub failed: i64,
    pub urgent: i64,
}

impl ResultCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.covid + self.h5n1 + self.healthy + self.failed
    }
}
