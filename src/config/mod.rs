use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the dispatch queue
    pub redis_url: String,

    /// Remote CSV listing the labs allowed to submit
    #[serde(default = "default_lab_list_url")]
    pub lab_list_url: String,

    /// Seconds before the cached lab list is fetched again
    #[serde(default = "default_lab_refresh_secs")]
    pub lab_refresh_secs: u64,

    /// External analysis program
    #[serde(default = "default_analysis_binary")]
    pub analysis_binary: PathBuf,

    /// Deadline for one analysis invocation
    #[serde(default = "default_analysis_timeout_secs")]
    pub analysis_timeout_secs: u64,

    /// Directory for temporary input/output files (system temp dir if unset)
    pub scratch_dir: Option<PathBuf>,

    /// Concurrent task loops per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Idle sleep between empty dequeues
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Move jobs to `failed` when analysis errors out instead of leaving them `pending`
    #[serde(default = "default_mark_failed_on_error")]
    pub mark_failed_on_error: bool,

    /// Prometheus listener for the worker process (disabled if unset)
    pub worker_metrics_addr: Option<String>,

    /// Claimed tasks untouched for this long are put back on their lane
    #[serde(default = "default_task_visibility_timeout_secs")]
    pub task_visibility_timeout_secs: u64,

    /// Retention of finished task metadata in Redis
    #[serde(default = "default_task_result_ttl_secs")]
    pub task_result_ttl_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_lab_list_url() -> String {
    "https://csse6400.uqcloud.net/resources/labs.csv".to_string()
}

fn default_lab_refresh_secs() -> u64 {
    3600
}

fn default_analysis_binary() -> PathBuf {
    PathBuf::from("/app/overflowengine")
}

fn default_analysis_timeout_secs() -> u64 {
    120
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

fn default_mark_failed_on_error() -> bool {
    true
}

fn default_task_visibility_timeout_secs() -> u64 {
    600
}

fn default_task_result_ttl_secs() -> u64 {
    86_400
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn lab_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.lab_refresh_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn task_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.task_visibility_timeout_secs)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
