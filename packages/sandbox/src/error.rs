// ABOUTME: Error types for sandbox execution
// ABOUTME: Build, readiness, provider and deadline failures, each mapped to an ErrorKind

use crate::providers::ProviderError;
use crate::types::ErrorKind;
use labrun_capture::CaptureError;
use thiserror::Error;

/// Failure to materialize a task's files.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Invalid project path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workspace files are not visible inside the runtime unit at {location}")]
    NotVisible { location: String },

    #[error("Dependency install failed (exit code {}).\n{log}", display_code(.exit_code))]
    Install { exit_code: Option<i64>, log: String },
}

/// Failure of a started server to become reachable.
#[derive(Error, Debug)]
pub enum ReadinessError {
    #[error("Server process exited before becoming ready (exit code {}).\n{log}", display_code(.exit_code))]
    Crashed { exit_code: Option<i64>, log: String },

    #[error("Server did not respond within {waited_secs}s.\n{log}")]
    Timeout { waited_secs: u64, log: String },
}

fn display_code(code: &Option<i64>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Invalid task '{task_id}': {reason}")]
    InvalidTask { task_id: String, reason: String },

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error("{0}")]
    Readiness(#[from] ReadinessError),

    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("Capture produced no artifacts:\n{summary}")]
    NoArtifacts { summary: String },

    #[error("Program exited with code {exit_code}: {stderr}")]
    Runtime { exit_code: i64, stderr: String },

    #[error("Runtime provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Task exceeded its {seconds}s deadline")]
    Timeout { seconds: u64 },

    #[error("Sandbox unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::InvalidTask { .. } => ErrorKind::InvalidTask,
            SandboxError::Build(_) => ErrorKind::BuildError,
            SandboxError::Readiness(ReadinessError::Crashed { .. }) => ErrorKind::Crashed,
            SandboxError::Readiness(ReadinessError::Timeout { .. }) => ErrorKind::ReadinessTimeout,
            SandboxError::Capture(_) | SandboxError::NoArtifacts { .. } => ErrorKind::CaptureError,
            SandboxError::Runtime { .. } => ErrorKind::RuntimeError,
            SandboxError::Timeout { .. } => ErrorKind::Timeout,
            SandboxError::Unavailable { .. } => ErrorKind::OrchestratorUnavailable,
            SandboxError::Provider(_) | SandboxError::Io(_) => ErrorKind::RuntimeError,
        }
    }
}
