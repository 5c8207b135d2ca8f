use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::models::task::{ClaimedTask, DispatchTask, Lane, TaskOutcome, TaskStatus};

const URGENT_QUEUE_KEY: &str = "pathogen:queue:urgent";
const NORMAL_QUEUE_KEY: &str = "pathogen:queue:normal";
const PROCESSING_KEY: &str = "pathogen:processing";

fn lane_key(lane: Lane) -> &'static str {
    match lane {
        Lane::Urgent => URGENT_QUEUE_KEY,
        Lane::Normal => NORMAL_QUEUE_KEY,
    }
}

fn task_key(task_id: Uuid) -> String {
    format!("pathogen:task:{task_id}")
}

fn request_key(request_id: Uuid) -> String {
    format!("pathogen:request:{request_id}")
}

/// Whether a claim last touched at `updated_at` is older than `older_than`.
/// Missing or unparsable timestamps count as expired.
fn claim_expired(updated_at: Option<&str>, now: DateTime<Utc>, older_than: Duration) -> bool {
    let Some(at) = updated_at.and_then(|v| DateTime::parse_from_rfc3339(v).ok()) else {
        return true;
    };
    let age = now.signed_duration_since(at.with_timezone(&Utc));
    age.to_std().is_ok_and(|age| age >= older_than)
}

/// Redis-backed dispatch queue with an urgent and a normal lane.
///
/// Task metadata lives in its own hash, so status polling works whether or
/// not the matching job row exists.
pub struct DispatchQueue {
    client: redis::Client,
    result_ttl_secs: i64,
}

impl DispatchQueue {
    pub fn new(redis_url: &str, result_ttl_secs: u64) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            result_ttl_secs: i64::try_from(result_ttl_secs).unwrap_or(i64::MAX),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Enqueue a task on the lane matching its urgency and return its handle.
    pub async fn enqueue(&self, task: &DispatchTask) -> Result<Uuid, QueueError> {
        let mut conn = self.connection().await?;
        let task_id = Uuid::new_v4();
        let lane = task.lane();
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        let now = Utc::now().to_rfc3339();
        let request_id = task.request_id.to_string();

        let fields = [
            ("status", TaskStatus::Queued.as_str()),
            ("lane", lane.as_str()),
            ("request_id", request_id.as_str()),
            ("task", payload.as_str()),
            ("enqueued_at", now.as_str()),
            ("updated_at", now.as_str()),
        ];

        redis::pipe()
            .atomic()
            .hset_multiple(task_key(task_id), &fields)
            .ignore()
            .set(request_key(task.request_id), task_id.to_string())
            .ignore()
            .lpush(lane_key(lane), task_id.to_string())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        Ok(task_id)
    }

    /// Claim the next task, urgent lane first, moving it to the processing
    /// list so no other worker can take it.
    ///
    /// Ids that cannot be turned back into a task are released here: orphans
    /// without metadata are dropped and unreadable payloads end `failed`.
    pub async fn dequeue(&self) -> Result<Option<ClaimedTask>, QueueError> {
        let mut conn = self.connection().await?;

        for lane in Lane::PRIORITY_ORDER {
            loop {
                let claimed: Option<String> = conn
                    .rpoplpush(lane_key(lane), PROCESSING_KEY)
                    .await
                    .map_err(QueueError::Redis)?;

                let Some(raw_id) = claimed else {
                    break;
                };

                let Ok(task_id) = Uuid::parse_str(&raw_id) else {
                    conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &raw_id)
                        .await
                        .map_err(QueueError::Redis)?;
                    tracing::warn!(raw_id = %raw_id, lane = %lane, "Dropping malformed task id");
                    continue;
                };
                let key = task_key(task_id);

                let payload: Option<String> = conn.hget(&key, "task").await.map_err(QueueError::Redis)?;
                let Some(payload) = payload else {
                    // Metadata expired or was removed; drop the orphaned id.
                    conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &raw_id)
                        .await
                        .map_err(QueueError::Redis)?;
                    tracing::warn!(task_id = %task_id, "Dropping task without metadata");
                    continue;
                };

                let task: DispatchTask = match serde_json::from_str(&payload) {
                    Ok(task) => task,
                    Err(e) => {
                        tracing::error!(task_id = %task_id, error = %e, "Task payload unreadable, failing task");
                        self.fail_unreadable(&mut conn, task_id, &e.to_string()).await?;
                        continue;
                    }
                };

                conn.hset_multiple::<_, _, _, ()>(
                    &key,
                    &[
                        ("status", TaskStatus::Running.as_str().to_string()),
                        ("updated_at", Utc::now().to_rfc3339()),
                    ],
                )
                .await
                .map_err(QueueError::Redis)?;

                return Ok(Some(ClaimedTask { task_id, lane, task }));
            }
        }

        Ok(None)
    }

    async fn fail_unreadable(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        task_id: Uuid,
        reason: &str,
    ) -> Result<(), QueueError> {
        let key = task_key(task_id);
        let request_id: Option<String> = conn.hget(&key, "request_id").await.map_err(QueueError::Redis)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &key,
                &[
                    ("status", TaskStatus::Failed.as_str().to_string()),
                    ("error", format!("Unreadable task payload: {reason}")),
                    ("updated_at", Utc::now().to_rfc3339()),
                ],
            )
            .ignore()
            .hdel(&key, "task")
            .ignore()
            .lrem(PROCESSING_KEY, 1, task_id.to_string())
            .ignore()
            .expire(&key, self.result_ttl_secs)
            .ignore();
        if let Some(request_id) = request_id.and_then(|r| Uuid::parse_str(&r).ok()) {
            pipe.expire(request_key(request_id), self.result_ttl_secs).ignore();
        }
        pipe.query_async::<()>(conn).await.map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Put tasks that sat in the processing list longer than `older_than`
    /// back on their lane, as if never claimed. Covers workers that died
    /// mid-task. Returns how many tasks were requeued.
    pub async fn reclaim_stale(&self, older_than: Duration) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let in_flight: Vec<String> = conn
            .lrange(PROCESSING_KEY, 0, -1)
            .await
            .map_err(QueueError::Redis)?;

        let now = Utc::now();
        let mut requeued = 0;
        for raw_id in in_flight {
            let task_id = Uuid::parse_str(&raw_id).ok();
            let fields: HashMap<String, String> = match task_id {
                Some(id) => conn.hgetall(task_key(id)).await.map_err(QueueError::Redis)?,
                None => HashMap::new(),
            };

            let lane = fields.get("lane").and_then(|l| Lane::from_str(l).ok());
            let (Some(task_id), Some(lane), true) = (task_id, lane, fields.contains_key("task")) else {
                // Nothing left to run; just release the id.
                conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &raw_id)
                    .await
                    .map_err(QueueError::Redis)?;
                continue;
            };
            let key = task_key(task_id);

            if !claim_expired(fields.get("updated_at").map(String::as_str), now, older_than) {
                continue;
            }

            // Only the caller that actually removed the id requeues it.
            let removed: i64 = conn
                .lrem(PROCESSING_KEY, 1, &raw_id)
                .await
                .map_err(QueueError::Redis)?;
            if removed == 0 {
                continue;
            }

            redis::pipe()
                .atomic()
                .hset_multiple(
                    &key,
                    &[
                        ("status", TaskStatus::Queued.as_str().to_string()),
                        ("updated_at", now.to_rfc3339()),
                    ],
                )
                .ignore()
                .rpush(lane_key(lane), &raw_id)
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .map_err(QueueError::Redis)?;

            tracing::warn!(task_id = %raw_id, lane = %lane, "Requeued stale in-flight task");
            requeued += 1;
        }

        Ok(requeued)
    }

    /// Record the outcome of a claimed task and release it from the
    /// processing list. Finished metadata expires after the result TTL.
    pub async fn complete(&self, claimed: &ClaimedTask, outcome: &TaskOutcome) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let key = task_key(claimed.task_id);
        let now = Utc::now().to_rfc3339();

        let (status, field, value) = match outcome {
            TaskOutcome::Succeeded(result) => (
                TaskStatus::Succeeded,
                "result",
                serde_json::to_string(result).map_err(QueueError::Serialize)?,
            ),
            TaskOutcome::Failed(error) => (TaskStatus::Failed, "error", error.clone()),
        };

        redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    ("status", status.as_str().to_string()),
                    (field, value),
                    ("updated_at", now),
                ],
            )
            .ignore()
            // The image is no longer needed once the task has finished.
            .hdel(&key, "task")
            .ignore()
            .lrem(PROCESSING_KEY, 1, claimed.task_id.to_string())
            .ignore()
            .expire(&key, self.result_ttl_secs)
            .ignore()
            .expire(request_key(claimed.task.request_id), self.result_ttl_secs)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        Ok(())
    }

    /// Status of a task, or `None` if the broker has no record of it.
    pub async fn get_status(&self, task_id: Uuid) -> Result<Option<TaskStatus>, QueueError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .hget(task_key(task_id), "status")
            .await
            .map_err(QueueError::Redis)?;

        raw.map(|s| {
            TaskStatus::from_str(&s).map_err(|_| QueueError::Corrupt(format!("unknown task status {s:?}")))
        })
        .transpose()
    }

    /// Result payload of a task. Defined only once the task has succeeded.
    pub async fn get_result(&self, task_id: Uuid) -> Result<Option<serde_json::Value>, QueueError> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(task_key(task_id))
            .await
            .map_err(QueueError::Redis)?;

        if fields.get("status").map(String::as_str) != Some(TaskStatus::Succeeded.as_str()) {
            return Ok(None);
        }

        match fields.get("result") {
            Some(raw) => Ok(Some(serde_json::from_str(raw).map_err(QueueError::Serialize)?)),
            None => Ok(Some(serde_json::Value::Null)),
        }
    }

    /// Task handle created for a job, if the broker still remembers it.
    pub async fn task_for_request(&self, request_id: Uuid) -> Result<Option<Uuid>, QueueError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(request_key(request_id)).await.map_err(QueueError::Redis)?;
        Ok(raw.and_then(|s| Uuid::parse_str(&s).ok()))
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Number of tasks waiting in a lane.
    pub async fn queue_depth(&self, lane: Lane) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(lane_key(lane)).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt task metadata: {0}")]
    Corrupt(String),
}
