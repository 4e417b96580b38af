// ABOUTME: Task model: languages, caller specs, validated tasks and results
// ABOUTME: Specs are validated once into tasks whose payload is a tagged enum

use crate::error::SandboxError;
use crate::validation::{validate_project_path, validate_route, validate_task_id};
use chrono::{DateTime, Utc};
use labrun_capture::{Artifact, RouteError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Runtime a task's code targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    #[serde(alias = "js")]
    JavaScript,
    C,
    #[serde(alias = "c++")]
    Cpp,
    Java,
    #[serde(alias = "sh", alias = "bash")]
    Shell,
    Html,
    Node,
}

/// Whether a language runs to completion or hosts a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Batch,
    Server,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Shell => "shell",
            Language::Html => "html",
            Language::Node => "node",
        }
    }

    pub fn runtime_kind(&self) -> RuntimeKind {
        match self {
            Language::Html | Language::Node => RuntimeKind::Server,
            _ => RuntimeKind::Batch,
        }
    }

    /// File a single source is written to.
    pub fn entry_file(&self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::JavaScript => "main.js",
            Language::C => "main.c",
            Language::Cpp => "main.cpp",
            Language::Java => "Main.java",
            Language::Shell => "main.sh",
            Language::Html => "index.html",
            Language::Node => "index.js",
        }
    }

    /// Shell command that compiles (if needed) and runs a batch entry file.
    /// `None` for server languages.
    pub fn batch_command(&self, entry: &str) -> Option<String> {
        let command = match self {
            Language::Python => format!("python3 -u {}", entry),
            Language::JavaScript => format!("node {}", entry),
            Language::C => format!("gcc -O1 -o .labrun-bin {} -lm && ./.labrun-bin", entry),
            Language::Cpp => format!("g++ -O1 -o .labrun-bin {} && ./.labrun-bin", entry),
            Language::Java => format!("java {}", entry),
            Language::Shell => format!("sh {}", entry),
            Language::Html | Language::Node => return None,
        };
        Some(command)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task as supplied by a caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Code to run: a single source string or a tree of files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPayload {
    Single(String),
    Project(BTreeMap<String, String>),
}

/// Validated, immutable unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub language: Language,
    pub payload: TaskPayload,
    pub routes: Vec<String>,
    pub timeout: Duration,
}

/// Bounds applied while validating a `TaskSpec`.
#[derive(Debug, Clone)]
pub struct TaskLimits {
    pub max_source_bytes: usize,
    pub batch_timeout: Duration,
    pub html_timeout: Duration,
    pub server_timeout: Duration,
    /// Hard cap on a caller-supplied timeout override.
    pub max_timeout: Duration,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: 64 * 1024,
            batch_timeout: Duration::from_secs(30),
            html_timeout: Duration::from_secs(30),
            server_timeout: Duration::from_secs(180),
            max_timeout: Duration::from_secs(600),
        }
    }
}

impl TaskLimits {
    pub fn default_timeout(&self, language: Language) -> Duration {
        match language {
            Language::Html => self.html_timeout,
            Language::Node => self.server_timeout,
            _ => self.batch_timeout,
        }
    }
}

impl Task {
    /// Validate `spec` and resolve its payload. Any problem is an
    /// `InvalidTask` error naming the task.
    pub fn from_spec(spec: TaskSpec, limits: &TaskLimits) -> Result<Task, SandboxError> {
        let invalid = |reason: String| SandboxError::InvalidTask {
            task_id: spec.id.clone(),
            reason,
        };

        validate_task_id(&spec.id).map_err(invalid)?;

        let payload = match (spec.source.clone(), spec.project.clone()) {
            (Some(source), None) => {
                if source.len() > limits.max_source_bytes {
                    return Err(invalid(format!(
                        "source is {} bytes, limit is {}",
                        source.len(),
                        limits.max_source_bytes
                    )));
                }
                TaskPayload::Single(source)
            }
            (None, Some(project)) => {
                if project.is_empty() {
                    return Err(invalid("project has no files".to_string()));
                }
                for (path, content) in &project {
                    validate_project_path(path).map_err(invalid)?;
                    if content.len() > limits.max_source_bytes {
                        return Err(invalid(format!(
                            "file '{}' is {} bytes, limit is {}",
                            path,
                            content.len(),
                            limits.max_source_bytes
                        )));
                    }
                }
                TaskPayload::Project(project)
            }
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "exactly one of 'source' or 'project' must be set, got both".to_string(),
                ))
            }
            (None, None) => {
                return Err(invalid(
                    "exactly one of 'source' or 'project' must be set, got neither".to_string(),
                ))
            }
        };

        if matches!(payload, TaskPayload::Project(_))
            && spec.language.runtime_kind() == RuntimeKind::Batch
            && !project_has_entry(&payload, spec.language)
        {
            return Err(invalid(format!(
                "{} project must contain {}",
                spec.language,
                spec.language.entry_file()
            )));
        }

        let routes = match spec.routes.clone() {
            Some(routes) if !routes.is_empty() => {
                for route in &routes {
                    validate_route(route).map_err(invalid)?;
                }
                routes
            }
            _ => vec!["/".to_string()],
        };

        let timeout = match spec.timeout_secs {
            Some(0) => return Err(invalid("timeout_secs must be positive".to_string())),
            Some(secs) => Duration::from_secs(secs).min(limits.max_timeout),
            None => limits.default_timeout(spec.language),
        };

        Ok(Task {
            id: spec.id,
            language: spec.language,
            payload,
            routes,
            timeout,
        })
    }
}

fn project_has_entry(payload: &TaskPayload, language: Language) -> bool {
    match payload {
        TaskPayload::Single(_) => true,
        TaskPayload::Project(files) => files.contains_key(language.entry_file()),
    }
}

/// Terminal status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// Machine-readable failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTask,
    BuildError,
    RuntimeError,
    Timeout,
    Crashed,
    ReadinessTimeout,
    CaptureError,
    OrchestratorUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTask => "invalid_task",
            ErrorKind::BuildError => "build_error",
            ErrorKind::RuntimeError => "runtime_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Crashed => "crashed",
            ErrorKind::ReadinessTimeout => "readiness_timeout",
            ErrorKind::CaptureError => "capture_error",
            ErrorKind::OrchestratorUnavailable => "orchestrator_unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Outcome of one task. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub stdout: String,
    pub exit_code: Option<i64>,
    pub artifacts: Vec<Artifact>,
    pub route_errors: Vec<RouteError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn completed(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Completed,
            stdout: String::new(),
            exit_code: None,
            artifacts: Vec::new(),
            route_errors: Vec::new(),
            error: None,
            error_kind: None,
            duration_ms: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(task_id: &str, kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            error: Some(error.into()),
            error_kind: Some(kind),
            ..Self::completed(task_id)
        }
    }

    pub fn from_error(task_id: &str, error: &SandboxError) -> Self {
        Self::failed(task_id, error.kind(), error.to_string())
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
