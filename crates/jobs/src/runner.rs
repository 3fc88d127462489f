//! The work a coordinator runs, and how it reports back.

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

use crate::coordinator::SharedLog;
use crate::{JobEvent, JobProgress, JobRequest, JobResult};

/// Executes one job.
///
/// Returning `Err` (or panicking) records a `failed` event carrying the
/// error's message.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, request: JobRequest, progress: ProgressReporter) -> anyhow::Result<JobResult>;
}

/// Handle a runner uses to publish progress for its job.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: String,
    log: SharedLog,
}

impl ProgressReporter {
    pub(crate) fn new(job_id: String, log: SharedLog) -> Self {
        Self { job_id, log }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Record a `running` event with `progress` and notify subscribers.
    pub fn report(&self, progress: JobProgress) {
        self.log.append(JobEvent::progress(&self.job_id, progress));
    }
}

type BlockingFn =
    dyn Fn(JobRequest, &ProgressReporter) -> anyhow::Result<JobResult> + Send + Sync;

/// A runner backed by a synchronous closure executed on the blocking pool.
pub struct BlockingRunner {
    f: Arc<BlockingFn>,
}

/// Adapt a synchronous closure into a [`JobRunner`].
pub fn blocking_runner<F>(f: F) -> BlockingRunner
where
    F: Fn(JobRequest, &ProgressReporter) -> anyhow::Result<JobResult> + Send + Sync + 'static,
{
    BlockingRunner { f: Arc::new(f) }
}

#[async_trait]
impl JobRunner for BlockingRunner {
    async fn run(&self, request: JobRequest, progress: ProgressReporter) -> anyhow::Result<JobResult> {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f(request, &progress)).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(anyhow::anyhow!(panic_message(e.into_panic().as_ref()))),
            Err(e) => Err(anyhow::anyhow!("job worker cancelled: {e}")),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("job panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("job panicked: {msg}")
    } else {
        "job panicked".to_string()
    }
}
