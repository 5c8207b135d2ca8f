use chrono::{DateTime, Utc};
use garde::Validate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{AnalysisJob, AnalysisResult, JobFilter, LabAllowList, ResultCounts};

const JOB_COLUMNS: &str = "request_id, lab_id, patient_id, result, urgent, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<AnalysisJob, StoreError> {
    let result: String = row.try_get("result")?;
    let result = AnalysisResult::from_str(&result)
        .map_err(|_| StoreError::Validation(format!("unknown result value {result:?}")))?;

    Ok(AnalysisJob {
        request_id: row.try_get("request_id")?,
        lab_id: row.try_get("lab_id")?,
        patient_id: row.try_get("patient_id")?,
        result,
        urgent: row.try_get("urgent")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Append `WHERE` clauses for every constrained field of `filter`.
fn push_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a JobFilter) {
    builder.push(" WHERE TRUE");
    if let Some(lab_id) = &filter.lab_id {
        builder.push(" AND lab_id = ").push_bind(lab_id.as_str());
    }
    if let Some(patient_id) = &filter.patient_id {
        builder.push(" AND patient_id = ").push_bind(patient_id.as_str());
    }
    if let Some(result) = filter.result {
        builder.push(" AND result = ").push_bind(result.as_str());
    }
    if let Some(urgent) = filter.urgent {
        builder.push(" AND urgent = ").push_bind(urgent);
    }
    if let Some(from) = filter.created_from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        builder.push(" AND created_at <= ").push_bind(to);
    }
}

/// PostgreSQL unique constraint violation: SQLSTATE 23505
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

/// Insert a new analysis job after checking the model invariants.
pub async fn create_job(
    pool: &PgPool,
    job: &AnalysisJob,
    valid_labs: &HashSet<String>,
) -> Result<(), StoreError> {
    job.validate_with(&LabAllowList(valid_labs.clone()))
        .map_err(|report| StoreError::Validation(report.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO analysis_jobs (request_id, lab_id, patient_id, result, urgent, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(job.request_id)
    .bind(&job.lab_id)
    .bind(&job.patient_id)
    .bind(job.result.as_str())
    .bind(job.urgent)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::DuplicateId(job.request_id)
        } else {
            StoreError::Database(e)
        }
    })?;

    Ok(())
}

/// Get a job by request ID
pub async fn get_job(pool: &PgPool, request_id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE request_id = $1"
    ))
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Set the classification of a job. Last writer wins.
pub async fn update_result(
    pool: &PgPool,
    request_id: Uuid,
    result: AnalysisResult,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let outcome = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET result = $1,
            updated_at = GREATEST($2, created_at)
        WHERE request_id = $3
        "#,
    )
    .bind(result.as_str())
    .bind(now)
    .bind(request_id)
    .execute(pool)
    .await?;

    if outcome.rows_affected() == 0 {
        return Err(StoreError::NotFound(request_id));
    }
    Ok(())
}

/// Reassign a job to another lab. Unchanged labs leave the row untouched.
pub async fn update_lab(
    pool: &PgPool,
    request_id: Uuid,
    lab_id: &str,
    valid_labs: &HashSet<String>,
    now: DateTime<Utc>,
) -> Result<AnalysisJob, StoreError> {
    let current = get_job(pool, request_id)
        .await?
        .ok_or(StoreError::NotFound(request_id))?;

    if !valid_labs.contains(lab_id) {
        return Err(StoreError::InvalidLab(lab_id.to_string()));
    }

    if current.lab_id == lab_id {
        return Ok(current);
    }

    let row = sqlx::query(&format!(
        r#"
        UPDATE analysis_jobs
        SET lab_id = $1,
            updated_at = GREATEST($2, created_at)
        WHERE request_id = $3
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(lab_id)
    .bind(now)
    .bind(request_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound(request_id))?;

    job_from_row(&row)
}

/// Jobs matching `filter`, oldest first, paged by `offset`/`limit`.
pub async fn query_jobs(
    pool: &PgPool,
    filter: &JobFilter,
    offset: i64,
    limit: Option<i64>,
) -> Result<Vec<AnalysisJob>, StoreError> {
    let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {JOB_COLUMNS} FROM analysis_jobs"));
    push_filter(&mut builder, filter);
    builder.push(" ORDER BY created_at ASC, request_id ASC");
    if let Some(limit) = limit {
        builder.push(" LIMIT ").push_bind(limit);
    }
    builder.push(" OFFSET ").push_bind(offset);

    let rows = builder.build().fetch_all(pool).await?;
    rows.iter().map(job_from_row).collect()
}

/// Number of jobs matching `filter`.
pub async fn count_jobs(pool: &PgPool, filter: &JobFilter) -> Result<i64, StoreError> {
    let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM analysis_jobs");
    push_filter(&mut builder, filter);

    let row = builder.build().fetch_one(pool).await?;
    Ok(row.try_get("total")?)
}

/// Per-result counts plus the urgent count for jobs matching `filter`.
pub async fn summarize_jobs(pool: &PgPool, filter: &JobFilter) -> Result<ResultCounts, StoreError> {
    let mut builder = QueryBuilder::<Postgres>::new(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE result = 'pending') AS pending,
            COUNT(*) FILTER (WHERE result = 'covid') AS covid,
            COUNT(*) FILTER (WHERE result = 'h5n1') AS h5n1,
            COUNT(*) FILTER (WHERE result = 'healthy') AS healthy,
            COUNT(*) FILTER (WHERE result = 'failed') AS failed,
            COUNT(*) FILTER (WHERE urgent) AS urgent
        FROM analysis_jobs
        "#,
    );
    push_filter(&mut builder, filter);

    let row = builder.build().fetch_one(pool).await?;
    Ok(ResultCounts {
        pending: row.try_get("pending")?,
        covid: row.try_get("covid")?,
        h5n1: row.try_get("h5n1")?,
        healthy: row.try_get("healthy")?,
        failed: row.try_get("failed")?,
        urgent: row.try_get("urgent")?,
    })
}

/// Every lab that has at least one job, sorted.
pub async fn distinct_lab_ids(pool: &PgPool) -> Result<Vec<String>, StoreError> {
    let rows = sqlx::query("SELECT DISTINCT lab_id FROM analysis_jobs ORDER BY lab_id")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|r| r.try_get("lab_id").map_err(StoreError::from))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Analysis job {0} not found")]
    NotFound(Uuid),

    #[error("Analysis job {0} already exists")]
    DuplicateId(Uuid),

    #[error("Invalid lab identifier: {0}")]
    InvalidLab(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
