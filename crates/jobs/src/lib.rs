//! Background jobs for Atlas.
//!
//! Long-running work (a backtest, a multi-step analysis) is submitted to a
//! [`JobCoordinator`], which runs it on a bounded worker pool and records an
//! ordered event log per job:
//!
//! ```text
//! queued → running (→ running + progress)* → succeeded | failed
//! ```
//!
//! Subscribers always receive the full history first and then every new
//! event, so subscribing late never loses anything.

pub mod coordinator;
pub mod runner;

pub use coordinator::{JobCoordinator, JobListener};
pub use runner::{BlockingRunner, JobRunner, ProgressReporter, blocking_runner};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Succeeded and failed are absorbing: nothing is recorded after them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub description: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl JobRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A progress report from a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
}

impl JobProgress {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step: None,
            total: None,
        }
    }

    pub fn step(message: impl Into<String>, step: u32, total: u32) -> Self {
        Self {
            message: message.into(),
            step: Some(step),
            total: Some(total),
        }
    }
}

/// The outcome of a successful job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobResult {
    pub summary: String,
    #[serde(default)]
    pub metrics: Map<String, Value>,
    #[serde(default)]
    pub artifacts: Vec<Value>,
}

/// One entry in a job's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    fn new(job_id: &str, status: JobStatus) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            progress: None,
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn queued(job_id: &str) -> Self {
        Self::new(job_id, JobStatus::Queued)
    }

    pub(crate) fn running(job_id: &str) -> Self {
        Self::new(job_id, JobStatus::Running)
    }

    pub(crate) fn progress(job_id: &str, progress: JobProgress) -> Self {
        Self {
            progress: Some(progress),
            ..Self::new(job_id, JobStatus::Running)
        }
    }

    pub(crate) fn succeeded(job_id: &str, result: JobResult) -> Self {
        Self {
            result: Some(result),
            ..Self::new(job_id, JobStatus::Succeeded)
        }
    }

    pub(crate) fn failed(job_id: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(job_id, JobStatus::Failed)
        }
    }
}

/// Job coordinator errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error("Unknown job id '{0}'")]
    NotFound(String),

    #[error("Event feed for job '{0}' closed before it finished")]
    Interrupted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Succeeded).unwrap(), "\"succeeded\"");
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn event_omits_empty_fields() {
        let json = serde_json::to_value(JobEvent::queued("abc")).unwrap();
        assert_eq!(json["status"], "queued");
        assert!(json.get("progress").is_none());
        assert!(json.get("error").is_none());

        let json = serde_json::to_value(JobEvent::progress("abc", JobProgress::step("warmup", 1, 4))).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["progress"]["step"], 1);
    }

    #[test]
    fn unknown_job_message() {
        assert_eq!(JobError::NotFound("nope".into()).to_string(), "Unknown job id 'nope'");
    }
}
