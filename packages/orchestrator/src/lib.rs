//! Labrun Orchestrator - runs a job's tasks through the sandbox and exposes
//! a pollable status document per job.

pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod settings;
pub mod types;

pub use error::{OrchestratorError, OrchestratorResult};
pub use executor::TaskExecutor;
pub use orchestrator::JobOrchestrator;
pub use settings::OrchestratorSettings;
pub use types::{JobStatus, JobStatusDocument, TaskState, TaskStatusDocument};
