//! The job coordinator.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

use crate::runner::{JobRunner, ProgressReporter, panic_message};
use crate::{JobError, JobEvent, JobRequest, JobResult, JobStatus};

/// Callback invoked with every event of a subscribed job.
///
/// Listeners run synchronously on the worker that emits the event, while
/// that job's log is locked. They must not call back into the coordinator
/// for the same job. A listener that panics is unsubscribed.
pub type JobListener = Arc<dyn Fn(&JobEvent) + Send + Sync>;

struct JobLog {
    events: Vec<JobEvent>,
    listeners: Vec<JobListener>,
}

/// One job's event log and subscribers, behind the job's own lock.
///
/// Append-and-notify and replay-then-register happen under the same
/// critical section, so a subscriber sees a gap-free prefix followed by
/// every later event exactly once.
#[derive(Clone)]
pub(crate) struct SharedLog(Arc<Mutex<JobLog>>);

impl SharedLog {
    fn new(first: JobEvent) -> Self {
        Self(Arc::new(Mutex::new(JobLog {
            events: vec![first],
            listeners: Vec::new(),
        })))
    }

    fn lock(&self) -> MutexGuard<'_, JobLog> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `event` and notify listeners. Returns `false` if the job had
    /// already finished, in which case the event is dropped.
    ///
    /// The event is recorded before any listener runs; a listener that
    /// panics is dropped and never sees another event.
    pub(crate) fn append(&self, event: JobEvent) -> bool {
        let mut log = self.lock();
        if log.events.last().is_some_and(|e| e.status.is_terminal()) {
            warn!(job_id = %event.job_id, status = %event.status, "Dropping event for finished job");
            return false;
        }

        let terminal = event.status.is_terminal();
        log.events.push(event.clone());
        log.listeners.retain(|listener| deliver(listener, &event));
        if terminal {
            // No further events can follow; release subscribers.
            log.listeners.clear();
        }
        true
    }

    fn subscribe(&self, listener: JobListener) {
        let mut log = self.lock();
        if !log.events.iter().all(|event| deliver(&listener, event)) {
            return;
        }
        if !log.events.last().is_some_and(|e| e.status.is_terminal()) {
            log.listeners.push(listener);
        }
    }

    fn last(&self) -> Option<JobEvent> {
        self.lock().events.last().cloned()
    }

    fn events(&self) -> Vec<JobEvent> {
        self.lock().events.clone()
    }
}

/// Call `listener` with `event`, containing any panic. Returns `false` if it
/// panicked.
fn deliver(listener: &JobListener, event: &JobEvent) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
        Ok(()) => true,
        Err(payload) => {
            warn!(
                job_id = %event.job_id,
                status = %event.status,
                error = %panic_message(payload.as_ref()),
                "Dropping job listener that panicked"
            );
            false
        }
    }
}

struct Inner {
    runner: Arc<dyn JobRunner>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    jobs: Mutex<HashMap<String, SharedLog>>,
}

/// Runs submitted jobs on a bounded pool and tracks their event logs.
///
/// Cheap to clone; clones share the same jobs.
#[derive(Clone)]
pub struct JobCoordinator {
    inner: Arc<Inner>,
}

impl JobCoordinator {
    /// Create a coordinator that runs at most `max_workers` jobs at once.
    pub fn new(runner: Arc<dyn JobRunner>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner: Arc::new(Inner {
                runner,
                workers: Arc::new(Semaphore::new(max_workers)),
                max_workers,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Queue `request` and return its job id immediately.
    ///
    /// The job starts once a worker slot is free. Must be called from within
    /// a Tokio runtime.
    pub fn submit(&self, request: JobRequest) -> String {
        let job_id = uuid::Uuid::new_v4().simple().to_string();
        let log = SharedLog::new(JobEvent::queued(&job_id));
        self.jobs().insert(job_id.clone(), log.clone());

        info!(job_id = %job_id, description = %request.description, "Job queued");

        let inner = Arc::clone(&self.inner);
        let id = job_id.clone();
        tokio::spawn(async move {
            let _permit = match Arc::clone(&inner.workers).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    log.append(JobEvent::failed(&id, "worker pool closed"));
                    return;
                }
            };

            log.append(JobEvent::running(&id));
            debug!(job_id = %id, "Job running");

            let reporter = ProgressReporter::new(id.clone(), log.clone());
            let outcome = AssertUnwindSafe(inner.runner.run(request, reporter))
                .catch_unwind()
                .await;

            let terminal = match outcome {
                Ok(Ok(result)) => {
                    info!(job_id = %id, "Job succeeded");
                    JobEvent::succeeded(&id, result)
                }
                Ok(Err(e)) => {
                    warn!(job_id = %id, error = %e, "Job failed");
                    JobEvent::failed(&id, format!("{e:#}"))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(job_id = %id, error = %message, "Job panicked");
                    JobEvent::failed(&id, message)
                }
            };
            log.append(terminal);
        });

        job_id
    }

    /// Register `listener` for a job, replaying its history first.
    pub fn subscribe(&self, job_id: &str, listener: JobListener) -> Result<(), JobError> {
        self.log(job_id)?.subscribe(listener);
        Ok(())
    }

    /// Subscribe through a channel. The channel closes after the terminal event.
    pub fn subscribe_channel(
        &self,
        job_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<JobEvent>, JobError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(
            job_id,
            Arc::new(move |event: &JobEvent| {
                let _ = tx.send(event.clone());
            }),
        )?;
        Ok(rx)
    }

    /// Wait until the job finishes and return its terminal event.
    pub async fn wait(&self, job_id: &str) -> Result<JobEvent, JobError> {
        let mut rx = self.subscribe_channel(job_id)?;
        while let Some(event) = rx.recv().await {
            if event.status.is_terminal() {
                return Ok(event);
            }
        }
        Err(JobError::Interrupted(job_id.to_string()))
    }

    /// The latest recorded status.
    pub fn get_status(&self, job_id: &str) -> Result<JobStatus, JobError> {
        self.latest(job_id).map(|e| e.status)
    }

    /// The result carried by the latest event; `None` until the job succeeds.
    pub fn get_result(&self, job_id: &str) -> Result<Option<JobResult>, JobError> {
        self.latest(job_id).map(|e| e.result)
    }

    /// The latest recorded event.
    pub fn latest(&self, job_id: &str) -> Result<JobEvent, JobError> {
        self.log(job_id)?
            .last()
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Every event recorded so far, oldest first.
    pub fn history(&self, job_id: &str) -> Result<Vec<JobEvent>, JobError> {
        Ok(self.log(job_id)?.events())
    }

    /// Ids of every submitted job.
    pub fn job_ids(&self) -> Vec<String> {
        self.jobs().keys().cloned().collect()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, SharedLog>> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, job_id: &str) -> Result<SharedLog, JobError> {
        self.jobs()
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }
}
