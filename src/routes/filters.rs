//! Query-string parsing shared by the read endpoints.
//!
//! Every parser returns an [`ApiError::Validation`] naming the offending
//! parameter, so handlers reject bad input before touching the job store.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::str::FromStr;

use crate::error::{ApiError, ApiResult};
use crate::models::analysis::{LabResultsParams, PatientResultsParams};
use crate::models::job::{is_valid_patient_id, AnalysisResult, JobFilter};

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

/// Non-empty value of an optional query parameter.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

pub fn parse_limit(raw: &Option<String>) -> ApiResult<i64> {
    let Some(raw) = present(raw) else {
        return Ok(DEFAULT_LIMIT);
    };
    match raw.parse::<i64>() {
        Ok(limit) if (1..=MAX_LIMIT).contains(&limit) => Ok(limit),
        _ => Err(ApiError::validation_detail(
            "invalid_limit",
            format!("Limit must be between 1 and {MAX_LIMIT}"),
        )),
    }
}

pub fn parse_offset(raw: &Option<String>) -> ApiResult<i64> {
    let Some(raw) = present(raw) else {
        return Ok(0);
    };
    match raw.parse::<i64>() {
        Ok(offset) if offset >= 0 => Ok(offset),
        _ => Err(ApiError::validation_detail(
            "invalid_offset",
            "Offset must be greater than or equal to 0",
        )),
    }
}

pub fn parse_result(raw: &Option<String>) -> ApiResult<Option<AnalysisResult>> {
    present(raw)
        .map(|v| {
            AnalysisResult::from_str(v).map_err(|_| {
                ApiError::validation_detail(
                    "invalid_result",
                    "Status must be one of pending, covid, h5n1, healthy, failed",
                )
            })
        })
        .transpose()
}

/// RFC 3339 timestamp. A value without an offset is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Inclusive `created_at` range from `start`/`end`.
pub fn parse_range(
    start: &Option<String>,
    end: &Option<String>,
) -> ApiResult<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let parse = |raw: Option<&str>| -> ApiResult<Option<DateTime<Utc>>> {
        raw.map(|v| {
            parse_timestamp(v).ok_or_else(|| {
                ApiError::validation_detail(
                    "invalid_date",
                    "Invalid date format. Must be in RFC3339 format",
                )
            })
        })
        .transpose()
    };

    let from = parse(present(start))?;
    let to = parse(present(end))?;

    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(ApiError::validation_detail(
                "invalid_date_range",
                "Start date must be before end date",
            ));
        }
    }
    Ok((from, to))
}

pub fn parse_patient_id(raw: &Option<String>) -> ApiResult<Option<String>> {
    match present(raw) {
        None => Ok(None),
        Some(v) if is_valid_patient_id(v) => Ok(Some(v.to_string())),
        Some(_) => Err(ApiError::validation_detail(
            "invalid_patient_id",
            "Patient ID must be an 11-digit Medicare number",
        )),
    }
}

/// `true`/`false`/`1`/`0`, case-insensitive.
pub fn parse_urgent(raw: &Option<String>) -> ApiResult<Option<bool>> {
    let Some(v) = present(raw) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(Some(true)),
        "false" | "0" => Ok(Some(false)),
        _ => Err(ApiError::validation_detail(
            "invalid_urgent",
            "Invalid urgent flag. Must be true or false",
        )),
    }
}

/// Filter plus paging for a lab's result listing.
#[derive(Debug, PartialEq)]
pub struct LabResultsQuery {
    pub filter: JobFilter,
    pub offset: i64,
    pub limit: i64,
}

pub fn lab_results_query(
    lab_id: &str,
    params: &LabResultsParams,
) -> ApiResult<LabResultsQuery> {
    let limit = parse_limit(&params.limit)?;
    let offset = parse_offset(&params.offset)?;
    let result = parse_result(&params.result)?;
    let (created_from, created_to) = parse_range(&params.start, &params.end)?;
    let patient_id = parse_patient_id(&params.patient_id)?;
    let urgent = parse_urgent(&params.urgent)?;

    Ok(LabResultsQuery {
        filter: JobFilter {
            lab_id: Some(lab_id.to_string()),
            patient_id,
            result,
            urgent,
            created_from,
            created_to,
        },
        offset,
        limit,
    })
}

pub fn patient_results_filter(
    params: &PatientResultsParams,
) -> ApiResult<JobFilter> {
    let patient_id = parse_patient_id(&params.patient_id)?.ok_or_else(|| {
        ApiError::validation_detail(
            "invalid_patient_id",
            "Patient ID must be an 11-digit Medicare number",
        )
    })?;
    let result = parse_result(&params.status)?;
    let (created_from, created_to) = parse_range(&params.start, &params.end)?;
    let urgent = parse_urgent(&params.urgent)?;

    Ok(JobFilter {
        lab_id: None,
        patient_id: Some(patient_id),
        result,
        urgent,
        created_from,
        created_to,
    })
}
