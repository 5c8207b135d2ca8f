//! Analysis worker: claims dispatch tasks and writes classifications back
//! to the job store.

use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;

use crate::db::queries::{self, StoreError};
use crate::models::job::AnalysisResult;
use crate::models::task::{ClaimedTask, TaskOutcome};
use crate::services::analysis::{AnalysisEngine, AnalysisError};
use crate::services::queue::{DispatchQueue, QueueError};

/// Handles a worker loop needs, passed in explicitly.
#[derive(Clone)]
pub struct Worker {
    pub db: PgPool,
    pub queue: Arc<DispatchQueue>,
    pub engine: Arc<AnalysisEngine>,
    /// Set `failed` on analysis errors instead of leaving the job `pending`.
    pub mark_failed_on_error: bool,
}

impl Worker {
    pub fn new(db: PgPool, queue: DispatchQueue, engine: AnalysisEngine, mark_failed_on_error: bool) -> Self {
        Self {
            db,
            queue: Arc::new(queue),
            engine: Arc::new(engine),
            mark_failed_on_error,
        }
    }

    /// Process the next task from the queue.
    /// Returns Ok(true) if a task was processed, Ok(false) if none was available.
    ///
    /// Analysis failures are handled here and do not surface as `Err`; only
    /// broker or database trouble does.
    pub async fn process_next_task(&self) -> Result<bool, WorkerError> {
        let claimed = match self.queue.dequeue().await? {
            Some(c) => c,
            None => return Ok(false),
        };

        tracing::info!(
            task_id = %claimed.task_id,
            request_id = %claimed.task.request_id,
            lane = %claimed.lane,
            "Processing analysis task"
        );

        let start = Instant::now();
        let analysis = self.engine.analyze(&claimed.task.image_payload).await;
        metrics::histogram!("analysis_processing_seconds").record(start.elapsed().as_secs_f64());

        let recorded = match analysis {
            Ok(result) => self.record_success(&claimed, result).await,
            Err(e) => self.record_failure(&claimed, &e).await,
        };

        // Release the task even when the job store write failed.
        let outcome = match &recorded {
            Ok(outcome) => outcome.clone(),
            Err(e) => TaskOutcome::Failed(e.to_string()),
        };
        self.queue.complete(&claimed, &outcome).await?;

        recorded?;
        Ok(true)
    }

    async fn record_success(
        &self,
        claimed: &ClaimedTask,
        result: AnalysisResult,
    ) -> Result<TaskOutcome, WorkerError> {
        let request_id = claimed.task.request_id;

        match queries::update_result(&self.db, request_id, result, Utc::now()).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(
                    task_id = %claimed.task_id,
                    request_id = %request_id,
                    "No job row for analysed task, result kept on task only"
                );
            }
            Err(e) => return Err(e.into()),
        }

        metrics::counter!("analysis_jobs_completed_total", "result" => result.as_str()).increment(1);
        tracing::info!(
            task_id = %claimed.task_id,
            request_id = %request_id,
            result = %result,
            "Analysis task completed"
        );

        Ok(TaskOutcome::Succeeded(serde_json::json!({
            "request_id": request_id,
            "result": result,
        })))
    }

    async fn record_failure(
        &self,
        claimed: &ClaimedTask,
        error: &AnalysisError,
    ) -> Result<TaskOutcome, WorkerError> {
        let request_id = claimed.task.request_id;
        tracing::error!(
            task_id = %claimed.task_id,
            request_id = %request_id,
            error = %error,
            "Analysis task failed"
        );
        metrics::counter!("analysis_jobs_failed_total").increment(1);

        if self.mark_failed_on_error {
            match queries::update_result(&self.db, request_id, AnalysisResult::Failed, Utc::now()).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(TaskOutcome::Failed(error.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
