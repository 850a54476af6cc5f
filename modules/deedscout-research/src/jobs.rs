//! Job manager: owns every job, dispatches one runner per address, and applies task
//! outcomes atomically.
//!
//! Job states: `pending → processing → {completed, failed}`. A job turns `processing` when
//! its first task starts and becomes terminal only once every task is terminal:
//! `completed` if any address resolved, `failed` if all of them errored.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use deedscout_common::{Config, DeedScoutError, Job, JobStatus, TaskStatus};

use crate::runner::{AddressRunner, ProgressSink, RunReport, RunSnapshot};
use crate::traits::JobStore;

pub const CANCELLED_BEFORE_DISPATCH: &str = "cancelled before dispatch";

/// Scheduling knobs for the job manager.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ResearchConfig {
    #[builder(default = 10)]
    pub max_addresses: usize,
    /// Pause before dispatching each address after the first.
    #[builder(default = Duration::from_millis(500))]
    pub processing_delay: Duration,
    #[builder(default = 2)]
    pub max_parallel_addresses: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&Config> for ResearchConfig {
    fn from(config: &Config) -> Self {
        Self::builder()
            .max_addresses(config.max_addresses)
            .processing_delay(config.processing_delay)
            .max_parallel_addresses(config.max_parallel_addresses)
            .build()
    }
}

/// A change to one task, applied under the job lock.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Started,
    Progress(RunSnapshot),
    Finished(RunReport),
    /// The runner panicked.
    Crashed(String),
    /// Cancelled before it was dispatched.
    Cancelled,
}

/// Apply an outcome to a task and refresh the job's derived fields. Returns `false` when
/// the outcome does not apply (unknown task, or it would move the task backwards).
pub fn apply_outcome(job: &mut Job, index: usize, outcome: TaskOutcome, now: DateTime<Utc>) -> bool {
    let Some(task) = job.tasks.get_mut(index) else {
        return false;
    };

    match outcome {
        TaskOutcome::Started => {
            if task.status != TaskStatus::Pending {
                return false;
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(now);
        }
        TaskOutcome::Progress(snapshot) => {
            if task.status != TaskStatus::Running || snapshot.evidence.len() < task.evidence.len() {
                return false;
            }
            task.evidence = snapshot.evidence;
            task.stages = snapshot.stages;
            task.errors = snapshot.errors;
        }
        TaskOutcome::Finished(report) => {
            if task.status.is_terminal() {
                return false;
            }
            task.status = report.status;
            task.evidence = report.evidence;
            task.stages = report.stages;
            task.errors = report.errors;
            task.result = Some(report.result);
            task.finished_at = Some(now);
        }
        TaskOutcome::Crashed(message) => {
            if task.status.is_terminal() {
                return false;
            }
            task.status = TaskStatus::Error;
            task.errors.push(format!("runner crashed: {message}"));
            task.finished_at = Some(now);
        }
        TaskOutcome::Cancelled => {
            if task.status != TaskStatus::Pending {
                return false;
            }
            task.status = TaskStatus::Error;
            task.errors.push(CANCELLED_BEFORE_DISPATCH.to_string());
            task.finished_at = Some(now);
        }
    }

    refresh(job, now);
    true
}

fn refresh(job: &mut Job, now: DateTime<Utc>) {
    job.completed_addresses = job.tasks.iter().filter(|t| t.status.is_terminal()).count();
    if job.status == JobStatus::Pending && job.tasks.iter().any(|t| t.status != TaskStatus::Pending) {
        job.status = JobStatus::Processing;
    }
    if !job.status.is_terminal() && job.tasks.iter().all(|t| t.status.is_terminal()) {
        job.status = if job.tasks.iter().any(|t| t.status == TaskStatus::Done) {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
    }
    job.updated_at = now;
}

/// Trim every address and enforce `1..=max` non-empty entries.
pub fn validate_addresses(addresses: &[String], max: usize) -> Result<Vec<String>, DeedScoutError> {
    if addresses.is_empty() {
        return Err(DeedScoutError::Validation(
            "at least one address is required".to_string(),
        ));
    }
    if addresses.len() > max {
        return Err(DeedScoutError::Validation(format!(
            "at most {max} addresses per request, got {}",
            addresses.len()
        )));
    }
    addresses
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Err(DeedScoutError::Validation(format!("address {} is empty", i + 1)))
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}

struct JobEntry {
    job: Job,
    cancelled: Arc<AtomicBool>,
}

struct Inner {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    runner: Arc<AddressRunner>,
    store: Option<Arc<dyn JobStore>>,
    config: ResearchConfig,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(
        runner: Arc<AddressRunner>,
        store: Option<Arc<dyn JobStore>>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                runner,
                store,
                config,
            }),
        }
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.inner.config
    }

    /// Validate and register a job, then dispatch its addresses in the background.
    /// Nothing is created when validation fails.
    pub async fn submit(&self, addresses: Vec<String>) -> Result<Uuid, DeedScoutError> {
        let addresses = validate_addresses(&addresses, self.inner.config.max_addresses)?;
        let job = Job::new(addresses.clone());
        let job_id = job.id;
        let cancelled = Arc::new(AtomicBool::new(false));

        self.inner.jobs.lock().await.insert(
            job_id,
            JobEntry {
                job: job.clone(),
                cancelled: cancelled.clone(),
            },
        );
        self.inner.persist(&job).await;

        info!(job_id = %job_id, addresses = addresses.len(), "Research job submitted");
        tokio::spawn(self.inner.clone().dispatch(job_id, addresses, cancelled));
        Ok(job_id)
    }

    /// Current snapshot: in-memory first, then the persistence mirror.
    pub async fn status(&self, job_id: Uuid) -> Result<Job, DeedScoutError> {
        if let Some(entry) = self.inner.jobs.lock().await.get(&job_id) {
            return Ok(entry.job.clone());
        }
        if let Some(store) = &self.inner.store {
            match store.load(job_id).await {
                Ok(Some(job)) => return Ok(job),
                Ok(None) => {}
                Err(e) => return Err(DeedScoutError::Storage(e.to_string())),
            }
        }
        Err(DeedScoutError::JobNotFound(job_id))
    }

    /// Stop dispatching. Tasks not yet started end as `error`; running tasks finish.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job, DeedScoutError> {
        let (job, changed) = {
            let mut jobs = self.inner.jobs.lock().await;
            let Some(entry) = jobs.get_mut(&job_id) else {
                drop(jobs);
                return self.status(job_id).await;
            };
            entry.cancelled.store(true, Ordering::SeqCst);
            let now = Utc::now();
            let mut changed = false;
            for index in 0..entry.job.tasks.len() {
                changed |= apply_outcome(&mut entry.job, index, TaskOutcome::Cancelled, now);
            }
            (entry.job.clone(), changed)
        };

        info!(job_id = %job_id, status = %job.status, "Research job cancelled");
        if changed {
            self.inner.settle(&job).await;
        }
        Ok(job)
    }

    pub async fn advance(&self, job_id: Uuid, index: usize, outcome: TaskOutcome) -> bool {
        self.inner.advance(job_id, index, outcome).await
    }

    pub async fn storage_connected(&self) -> bool {
        match &self.inner.store {
            Some(store) => store.is_connected().await,
            None => false,
        }
    }
}

impl Inner {
    async fn advance(&self, job_id: Uuid, index: usize, outcome: TaskOutcome) -> bool {
        let job = {
            let mut jobs = self.jobs.lock().await;
            let Some(entry) = jobs.get_mut(&job_id) else {
                warn!(job_id = %job_id, "Outcome for unknown job dropped");
                return false;
            };
            if !apply_outcome(&mut entry.job, index, outcome, Utc::now()) {
                return false;
            }
            entry.job.clone()
        };

        if job.is_terminal() {
            info!(
                job_id = %job_id,
                status = %job.status,
                completed = job.completed_addresses,
                total = job.total_addresses,
                "Research job finished"
            );
        }
        self.settle(&job).await;
        true
    }

    /// Mirror a job; a terminal job that reached the store no longer needs its in-memory
    /// copy, and later reads are served by the store.
    async fn settle(&self, job: &Job) {
        if self.persist(job).await && job.is_terminal() {
            self.jobs.lock().await.remove(&job.id);
            debug!(job_id = %job.id, "Finished job evicted from memory");
        }
    }

    /// Returns `true` when the job reached the store.
    async fn persist(&self, job: &Job) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.save(job).await {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to mirror job to store");
                false
            }
        }
    }

    async fn dispatch(
        self: Arc<Self>,
        job_id: Uuid,
        addresses: Vec<String>,
        cancelled: Arc<AtomicBool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_addresses.max(1)));
        let mut running = JoinSet::new();

        for (index, address) in addresses.into_iter().enumerate() {
            if index > 0 && !self.config.processing_delay.is_zero() {
                tokio::time::sleep(self.config.processing_delay).await;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if cancelled.load(Ordering::SeqCst) {
                info!(job_id = %job_id, remaining_from = index, "Dispatch stopped by cancellation");
                break;
            }
            if !self.advance(job_id, index, TaskOutcome::Started).await {
                continue;
            }

            let inner = self.clone();
            running.spawn(async move {
                let _permit = permit;
                let sink = TaskProgress {
                    inner: inner.clone(),
                    job_id,
                    index,
                };
                let outcome = match AssertUnwindSafe(inner.runner.run(&address, &sink))
                    .catch_unwind()
                    .await
                {
                    Ok(report) => TaskOutcome::Finished(report),
                    Err(payload) => {
                        let message = panic_message(payload);
                        error!(job_id = %job_id, address, panic = %message, "Runner panicked");
                        TaskOutcome::Crashed(message)
                    }
                };
                inner.advance(job_id, index, outcome).await;
            });
        }

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(job_id = %job_id, error = %e, "Runner task aborted");
            }
        }
    }
}

struct TaskProgress {
    inner: Arc<Inner>,
    job_id: Uuid,
    index: usize,
}

#[async_trait]
impl ProgressSink for TaskProgress {
    async fn progress(&self, snapshot: RunSnapshot) {
        self.inner
            .advance(self.job_id, self.index, TaskOutcome::Progress(snapshot))
            .await;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}
