// ABOUTME: Job orchestrator: accepts a task list, fans it out, and tracks per-task and job state
// ABOUTME: Jobs live in memory until cleared; a panicking task fails alone with `internal`

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::executor::TaskExecutor;
use crate::settings::OrchestratorSettings;
use crate::types::{JobRecord, JobStatus, JobStatusDocument, TaskEntry, TaskState};
use chrono::Utc;
use labrun_sandbox::{ErrorKind, Task, TaskLimits, TaskResult, TaskSpec};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct JobOrchestrator {
    executor: Arc<dyn TaskExecutor>,
    jobs: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
    semaphore: Arc<Semaphore>,
    limits: TaskLimits,
}

impl JobOrchestrator {
    pub fn new(executor: Arc<dyn TaskExecutor>, settings: OrchestratorSettings) -> Self {
        info!(
            "Job orchestrator running up to {} task(s) at once",
            settings.max_concurrent_tasks
        );
        Self {
            executor,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent_tasks.max(1))),
            limits: settings.limits,
        }
    }

    /// Record a job for `specs` and start it in the background.
    ///
    /// Returns immediately. A job whose input is invalid is recorded as
    /// `failed` and never started.
    pub async fn submit(&self, specs: Vec<TaskSpec>) -> Uuid {
        let job_id = Uuid::new_v4();
        let created_at = Utc::now();

        match self.validate(specs) {
            Ok(tasks) => {
                let record = JobRecord {
                    id: job_id,
                    status: JobStatus::Pending,
                    created_at,
                    finished_at: None,
                    error: None,
                    tasks: tasks.iter().map(|t| TaskEntry::pending(&t.id)).collect(),
                };
                self.jobs.write().await.insert(job_id, record);
                info!("Submitted job {} with {} task(s)", job_id, tasks.len());

                let orchestrator = self.clone();
                tokio::spawn(async move {
                    orchestrator.run_job(job_id, tasks).await;
                });
            }
            Err(rejection) => {
                warn!("Rejected job {}: {}", job_id, rejection.reason);
                let record = JobRecord {
                    id: job_id,
                    status: JobStatus::Failed,
                    created_at,
                    finished_at: Some(Utc::now()),
                    error: Some(rejection.reason),
                    tasks: rejection.tasks,
                };
                self.jobs.write().await.insert(job_id, record);
            }
        }

        job_id
    }

    pub async fn status(&self, job_id: Uuid) -> OrchestratorResult<JobStatusDocument> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(JobRecord::document)
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    /// Every retained job, oldest first.
    pub async fn list(&self) -> Vec<JobStatusDocument> {
        let mut documents: Vec<JobStatusDocument> = self
            .jobs
            .read()
            .await
            .values()
            .map(JobRecord::document)
            .collect();
        documents.sort_by_key(|d| d.created_at);
        documents
    }

    /// Forget a finished job.
    pub async fn clear(&self, job_id: Uuid) -> OrchestratorResult<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(&job_id) {
            None => Err(OrchestratorError::JobNotFound(job_id)),
            Some(record) if !record.status.is_terminal() => {
                Err(OrchestratorError::JobActive(job_id))
            }
            Some(_) => {
                jobs.remove(&job_id);
                debug!("Cleared job {}", job_id);
                Ok(())
            }
        }
    }

    /// Poll `status` every `poll` until the job is terminal or `timeout` passes.
    pub async fn wait(
        &self,
        job_id: Uuid,
        poll: Duration,
        timeout: Duration,
    ) -> OrchestratorResult<JobStatusDocument> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let document = self.status(job_id).await?;
            if document.is_terminal() {
                return Ok(document);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OrchestratorError::WaitTimeout {
                    job_id,
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn validate(&self, specs: Vec<TaskSpec>) -> Result<Vec<Task>, Rejection> {
        if specs.is_empty() {
            return Err(Rejection {
                reason: "job has no tasks".to_string(),
                tasks: Vec::new(),
            });
        }

        let mut seen = HashSet::new();
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = spec.id.clone();
            let outcome = if seen.insert(id.clone()) {
                Task::from_spec(spec, &self.limits).map_err(|e| e.to_string())
            } else {
                Err(format!("Invalid task '{}': duplicate task id", id))
            };
            outcomes.push((id, outcome));
        }

        let invalid = outcomes.iter().filter(|(_, o)| o.is_err()).count();
        if invalid == 0 {
            return Ok(outcomes
                .into_iter()
                .filter_map(|(_, outcome)| outcome.ok())
                .collect());
        }

        let reason = format!("{} of {} task(s) are invalid", invalid, outcomes.len());
        let tasks = outcomes
            .into_iter()
            .map(|(id, outcome)| {
                let result = match outcome {
                    Err(e) => TaskResult::failed(&id, ErrorKind::InvalidTask, e),
                    Ok(_) => TaskResult::failed(
                        &id,
                        ErrorKind::OrchestratorUnavailable,
                        format!("Job rejected: {}", reason),
                    ),
                };
                let mut entry = TaskEntry::pending(&id);
                entry.finish(result);
                entry
            })
            .collect();

        Err(Rejection { reason, tasks })
    }

    async fn run_job(&self, job_id: Uuid, tasks: Vec<Task>) {
        if let Err(reason) = self.executor.preflight().await {
            error!("Job {} cannot start: {}", job_id, reason);
            let mut jobs = self.jobs.write().await;
            if let Some(record) = jobs.get_mut(&job_id) {
                for entry in record.tasks.iter_mut().filter(|t| !t.state.is_terminal()) {
                    let result = TaskResult::failed(
                        &entry.task_id,
                        ErrorKind::OrchestratorUnavailable,
                        reason.clone(),
                    );
                    entry.finish(result);
                }
                record.status = JobStatus::Failed;
                record.error = Some(reason);
                record.finished_at = Some(Utc::now());
            }
            return;
        }

        self.set_job_status(job_id, JobStatus::Running).await;

        let mut set = JoinSet::new();
        for task in tasks {
            let orchestrator = self.clone();
            set.spawn(async move { orchestrator.run_task(job_id, task).await });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!("Task runner of job {} aborted: {}", job_id, e);
            }
        }

        let mut jobs = self.jobs.write().await;
        if let Some(record) = jobs.get_mut(&job_id) {
            for entry in record.tasks.iter_mut().filter(|t| !t.state.is_terminal()) {
                let result = TaskResult::failed(
                    &entry.task_id,
                    ErrorKind::Internal,
                    "Task finished without reporting a result",
                );
                entry.finish(result);
            }
            record.status = JobStatus::Completed;
            record.finished_at = Some(Utc::now());
            info!(
                "Job {} completed: {} completed, {} failed",
                job_id,
                record
                    .tasks
                    .iter()
                    .filter(|t| t.state == TaskState::Completed)
                    .count(),
                record
                    .tasks
                    .iter()
                    .filter(|t| t.state == TaskState::Failed)
                    .count()
            );
        }
    }

    async fn run_task(&self, job_id: Uuid, task: Task) {
        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.record_result(
                    job_id,
                    TaskResult::failed(&task.id, ErrorKind::Internal, "Task scheduler closed"),
                )
                .await;
                return;
            }
        };

        self.set_task_state(job_id, &task.id, TaskState::Running)
            .await;

        let task_id = task.id.clone();
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move { executor.execute(&task).await });
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Task {} of job {} panicked: {}", task_id, job_id, e);
                TaskResult::failed(&task_id, ErrorKind::Internal, panic_message(e))
            }
        };

        self.record_result(job_id, result).await;
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) {
        if let Some(record) = self.jobs.write().await.get_mut(&job_id) {
            record.status = status;
        }
    }

    async fn set_task_state(&self, job_id: Uuid, task_id: &str, state: TaskState) {
        if let Some(entry) = self
            .jobs
            .write()
            .await
            .get_mut(&job_id)
            .and_then(|r| r.task_mut(task_id))
        {
            entry.state = state;
        }
    }

    async fn record_result(&self, job_id: Uuid, result: TaskResult) {
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(&job_id) else {
            debug!("Job {} was cleared before task {} finished", job_id, result.task_id);
            return;
        };
        if let Some(entry) = record.task_mut(&result.task_id) {
            debug!(
                "Task {} of job {} is {:?}",
                result.task_id, job_id, result.status
            );
            entry.finish(result);
        }
    }
}

/// Why a submitted job was not started, with the per-task results to record.
struct Rejection {
    reason: String,
    tasks: Vec<TaskEntry>,
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return format!("Task was cancelled: {}", error);
    }
    let payload = error.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Task panicked: {}", detail)
}
