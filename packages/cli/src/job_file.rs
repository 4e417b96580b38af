// ABOUTME: Job file parsing for `labrun run`
// ABOUTME: Accepts a bare JSON array of task specs or an object with a `tasks` field

use labrun_sandbox::TaskSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobFileError {
    #[error("Failed to read job file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid job file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// On-disk job layouts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum JobFile {
    List(Vec<TaskSpec>),
    Wrapped { tasks: Vec<TaskSpec> },
}

impl JobFile {
    pub fn into_tasks(self) -> Vec<TaskSpec> {
        match self {
            JobFile::List(tasks) | JobFile::Wrapped { tasks } => tasks,
        }
    }
}

pub fn parse_job(raw: &str) -> Result<Vec<TaskSpec>, serde_json::Error> {
    serde_json::from_str::<JobFile>(raw).map(JobFile::into_tasks)
}

pub async fn load_job_file(path: &Path) -> Result<Vec<TaskSpec>, JobFileError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| JobFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_job(&raw).map_err(|source| JobFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use labrun_sandbox::Language;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_bare_array() {
        let tasks = parse_job(
            r#"[
                {"id": "hello", "language": "python", "source": "print('hi')"},
                {"id": "site", "language": "html", "project": {"index.html": "<h1>x</h1>"}, "routes": ["/"]}
            ]"#,
        )
        .unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "hello");
        assert_eq!(tasks[0].language, Language::Python);
        assert_eq!(tasks[1].routes, Some(vec!["/".to_string()]));
        assert!(tasks[1].project.as_ref().unwrap().contains_key("index.html"));
    }

    #[test]
    fn test_parse_wrapped_object() {
        let tasks = parse_job(
            r#"{"tasks": [{"id": "a", "language": "shell", "source": "echo a", "timeout_secs": 5}]}"#,
        )
        .unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].timeout_secs, Some(5));
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(parse_job(r#"{"jobs": []}"#).is_err());
        assert!(parse_job(r#"[{"id": "a"}]"#).is_err());
        assert!(parse_job("not json").is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.json");

        let err = load_job_file(&path).await.unwrap_err();
        assert!(matches!(err, JobFileError::Read { .. }));
        assert!(err.to_string().contains("missing.json"));
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(&path, r#"[{"id": "x", "language": "shell", "source": "true"}]"#).unwrap();

        let tasks = load_job_file(&path).await.unwrap();
        assert_eq!(tasks[0].id, "x");
    }
}
