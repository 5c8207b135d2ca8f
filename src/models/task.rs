use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Work item carried by the dispatch queue to an analysis worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchTask {
    pub patient_id: String,
    pub lab_id: String,
    /// Base64-encoded image exactly as submitted.
    pub image_payload: String,
    pub urgent: bool,
    pub request_id: Uuid,
}

impl DispatchTask {
    pub fn lane(&self) -> Lane {
        if self.urgent {
            Lane::Urgent
        } else {
            Lane::Normal
        }
    }
}

/// Queue partition. Urgent work is always drained before normal work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Lane {
    Urgent,
    Normal,
}

impl Lane {
    /// Lanes in the order workers poll them.
    pub const PRIORITY_ORDER: [Lane; 2] = [Lane::Urgent, Lane::Normal];

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Lifecycle of a dispatch task, tracked by the broker independently of
/// the job row.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// How a dequeued task ended.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded(serde_json::Value),
    Failed(String),
}

/// A task handed to a worker by the queue.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task_id: Uuid,
    pub lane: Lane,
    pub task: DispatchTask,
}

/// Response for `GET /api/v1/todos/ical/{task_id}/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub task_status: TaskStatus,
    pub result_url: String,
}
