// ABOUTME: Job and per-task state, and the pollable status document
// ABOUTME: Records live behind the orchestrator's lock; documents are serializable snapshots

use chrono::{DateTime, Utc};
use labrun_sandbox::{Artifact, ErrorKind, RouteError, TaskResult, TaskStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl From<TaskStatus> for TaskState {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Completed => TaskState::Completed,
            TaskStatus::Failed => TaskState::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TaskEntry {
    pub task_id: String,
    pub state: TaskState,
    pub result: Option<TaskResult>,
}

impl TaskEntry {
    pub fn pending(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            state: TaskState::Pending,
            result: None,
        }
    }

    pub fn finish(&mut self, result: TaskResult) {
        self.state = result.status.into();
        self.result = Some(result);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Why the job could not begin.
    pub error: Option<String>,
    pub tasks: Vec<TaskEntry>,
}

impl JobRecord {
    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut TaskEntry> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }

    pub fn document(&self) -> JobStatusDocument {
        JobStatusDocument {
            job_id: self.id,
            status: self.status,
            created_at: self.created_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
            tasks: self.tasks.iter().map(TaskStatusDocument::from_entry).collect(),
        }
    }
}

/// Per-task view inside a [`JobStatusDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusDocument {
    pub task_id: String,
    pub status: TaskState,
    pub stdout: String,
    pub exit_code: Option<i64>,
    pub artifacts: Vec<Artifact>,
    pub route_errors: Vec<RouteError>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: Option<u64>,
}

impl TaskStatusDocument {
    fn from_entry(entry: &TaskEntry) -> Self {
        match &entry.result {
            Some(result) => Self {
                task_id: entry.task_id.clone(),
                status: entry.state,
                stdout: result.stdout.clone(),
                exit_code: result.exit_code,
                artifacts: result.artifacts.clone(),
                route_errors: result.route_errors.clone(),
                error: result.error.clone(),
                error_kind: result.error_kind,
                duration_ms: Some(result.duration_ms),
            },
            None => Self {
                task_id: entry.task_id.clone(),
                status: entry.state,
                stdout: String::new(),
                exit_code: None,
                artifacts: Vec::new(),
                route_errors: Vec::new(),
                error: None,
                error_kind: None,
                duration_ms: None,
            },
        }
    }
}

/// Snapshot of a job, as returned by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusDocument {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tasks: Vec<TaskStatusDocument>,
}

impl JobStatusDocument {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.status == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pending_entry_document() {
        let record = JobRecord {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
            tasks: vec![TaskEntry::pending("a")],
        };
        let doc = record.document();
        assert_eq!(doc.tasks[0].status, TaskState::Pending);
        assert_eq!(doc.tasks[0].duration_ms, None);
        assert!(!doc.is_terminal());
    }

    #[test]
    fn test_finished_entry_carries_result() {
        let mut entry = TaskEntry::pending("a");
        entry.finish(TaskResult::failed("a", ErrorKind::Crashed, "exit 1"));
        assert_eq!(entry.state, TaskState::Failed);

        let doc = TaskStatusDocument::from_entry(&entry);
        assert_eq!(doc.error_kind, Some(ErrorKind::Crashed));
        assert_eq!(doc.error.as_deref(), Some("exit 1"));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        let json = serde_json::to_string(&TaskState::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
