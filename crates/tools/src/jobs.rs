//! Tools that start background jobs and report on them.
//!
//! `start_job` returns as soon as the job is queued; the model (or the user)
//! polls with `job_status`.

use async_trait::async_trait;
use atlas_core::error::ToolError;
use atlas_core::tool::{Tool, ToolResult};
use atlas_jobs::{JobCoordinator, JobRequest, JobStatus};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::debug;

pub struct StartJobTool {
    coordinator: Arc<JobCoordinator>,
}

impl StartJobTool {
    pub fn new(coordinator: Arc<JobCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl<C: Send + Sync> Tool<C> for StartJobTool {
    fn name(&self) -> &str {
        "start_job"
    }

    fn description(&self) -> &str {
        "Start a long-running background job such as a backtest. Returns a job id immediately; use job_status to follow it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "What the job should do, e.g. 'EMA crossover backtest on AAPL'"
                },
                "parameters": {
                    "type": "object",
                    "description": "Structured inputs for the job"
                }
            },
            "required": ["description"]
        })
    }

    async fn execute(&self, _context: &C, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let description = arguments
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("start_job requires a 'description'".into()))?;

        let parameters = match arguments.get("parameters") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(params)) => params.clone(),
            Some(_) => {
                return Err(ToolError::InvalidArguments(
                    "start_job 'parameters' must be an object".into(),
                ));
            }
        };

        let job_id = self
            .coordinator
            .submit(JobRequest::new(description).with_parameters(parameters));
        debug!(job_id = %job_id, "Submitted job from tool call");

        Ok(ToolResult::new(
            "start_job",
            json!({ "job_id": job_id, "status": JobStatus::Queued }),
            format!("Started job {job_id}"),
        ))
    }
}

pub struct JobStatusTool {
    coordinator: Arc<JobCoordinator>,
}

impl JobStatusTool {
    pub fn new(coordinator: Arc<JobCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl<C: Send + Sync> Tool<C> for JobStatusTool {
    fn name(&self) -> &str {
        "job_status"
    }

    fn description(&self) -> &str {
        "Check a background job: its status, latest progress, and result or error once finished."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "job_id": {
                    "type": "string",
                    "description": "The id returned by start_job"
                }
            },
            "required": ["job_id"]
        })
    }

    async fn execute(&self, _context: &C, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let job_id = arguments
            .get("job_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("job_status requires a 'job_id'".into()))?;

        let history = self
            .coordinator
            .history(job_id)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let Some(latest) = history.last() else {
            return Err(ToolError::InvalidArguments(format!("Unknown job id '{job_id}'")));
        };
        let progress = history.iter().rev().find_map(|e| e.progress.clone());

        let mut data = json!({
            "job_id": job_id,
            "status": latest.status,
            "events": history.len(),
        });
        if let Some(progress) = &progress {
            data["progress"] = json!(progress);
        }
        if let Some(result) = &latest.result {
            data["result"] = json!(result);
        }
        if let Some(error) = &latest.error {
            data["error"] = json!(error);
        }

        let message = match (&latest.status, &progress) {
            (JobStatus::Running, Some(p)) => format!("Job {job_id} is running: {}", p.message),
            (JobStatus::Failed, _) => format!(
                "Job {job_id} failed: {}",
                latest.error.as_deref().unwrap_or("unknown error")
            ),
            (status, _) => format!("Job {job_id} is {status}"),
        };

        Ok(ToolResult::new("job_status", data, message))
    }
}
