use base64::Engine;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::models::job::AnalysisResult;

/// Maximum stdout/stderr kept for logging, per stream.
const MAX_CAPTURED_OUTPUT: usize = 4096;

/// Runs the external pathogen analysis program on one image.
///
/// The program is spawned directly (no shell) as
/// `<binary> --input <image> --output <result>`. Both files are scratch
/// files that are removed when this call returns, whatever the outcome.
pub struct AnalysisEngine {
    binary: PathBuf,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl AnalysisEngine {
    pub fn new(binary: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            scratch_dir: scratch_dir.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Decode, analyze and classify a base64-encoded image.
    pub async fn analyze(&self, image_base64: &str) -> Result<AnalysisResult, AnalysisError> {
        let image = base64::engine::general_purpose::STANDARD
            .decode(image_base64.trim())
            .map_err(AnalysisError::Decode)?;

        // Dropping these handles deletes the files, on every return path.
        let input = tempfile::Builder::new()
            .prefix("temp_")
            .suffix(".jpg")
            .tempfile_in(&self.scratch_dir)
            .map_err(AnalysisError::Io)?;
        // Only the path is reserved; the report must be written by the binary.
        let output_dir = tempfile::Builder::new()
            .prefix("result_")
            .tempdir_in(&self.scratch_dir)
            .map_err(AnalysisError::Io)?;
        let output = output_dir.path().join("result.txt");

        tokio::fs::write(input.path(), &image)
            .await
            .map_err(AnalysisError::Io)?;

        self.run(input.path(), &output).await?;

        let report = tokio::fs::read(&output)
            .await
            .map_err(|source| AnalysisError::Report {
                path: output.clone(),
                source,
            })?;
        let report = String::from_utf8_lossy(&report);
        let result = classify(&report);

        tracing::debug!(
            result = %result,
            report_bytes = report.len(),
            "Analysis output classified"
        );

        Ok(result)
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<(), AnalysisError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--input")
            .arg(input)
            .arg("--output")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = cmd.spawn().map_err(|source| AnalysisError::Spawn {
            binary: self.binary.clone(),
            source,
        })?;

        // On timeout the child future is dropped, and `kill_on_drop` kills it.
        let finished = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AnalysisError::Timeout(self.timeout))?
            .map_err(AnalysisError::Io)?;

        let stdout = truncated(&finished.stdout);
        let stderr = truncated(&finished.stderr);

        tracing::debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            exit_code = finished.status.code(),
            stdout = %stdout,
            stderr = %stderr,
            "Analysis binary finished"
        );

        if !finished.status.success() {
            return Err(AnalysisError::ExitStatus {
                code: finished.status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

fn truncated(bytes: &[u8]) -> String {
    let end = bytes.len().min(MAX_CAPTURED_OUTPUT);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Map the analysis report to a result category.
///
/// Case-insensitive substring match, checked in order: `covid-19`, `h5n1`,
/// `healthy`. Anything else leaves the job `pending`.
pub fn classify(report: &str) -> AnalysisResult {
    let report = report.to_lowercase();
    if report.contains("covid-19") {
        AnalysisResult::Covid
    } else if report.contains("h5n1") {
        AnalysisResult::H5n1
    } else if report.contains("healthy") {
        AnalysisResult::Healthy
    } else {
        AnalysisResult::Pending
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Scratch file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start {binary:?}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Analysis exceeded {0:?}")]
    Timeout(Duration),

    #[error("Analysis exited with status {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("Analysis report {path:?} could not be read: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
