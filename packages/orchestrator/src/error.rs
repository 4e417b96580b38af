// ABOUTME: Error types for job orchestration
// ABOUTME: Lookup failures and jobs that cannot be waited on or cleared

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {0} is still running")]
    JobActive(Uuid),

    #[error("Job {job_id} did not finish within {seconds}s")]
    WaitTimeout { job_id: Uuid, seconds: u64 },
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
