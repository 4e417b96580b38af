// ABOUTME: Sandbox runtime adapter: runs one task end to end and reports a TaskResult
// ABOUTME: Batch tasks run to completion offline; server tasks boot, get probed and are captured per route

use crate::error::{Result, SandboxError};
use crate::lifecycle::{self, unit_name, ContainerLifecycleManager, LaunchPlan};
use crate::providers::{
    CommandOutput, DockerProvider, LocalProcessProvider, RuntimeProvider, UnitConfig,
};
use crate::scope::TaskScope;
use crate::settings::{ProviderKind, SandboxSettings};
use crate::types::{ErrorKind, RuntimeKind, Task, TaskPayload, TaskResult};
use crate::workspace::ProjectBuilder;
use labrun_capture::{
    CaptureService, CaptureSettings, CaptureTarget, Capturer, RouteError, Transcript,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Rendered transcript of a batch run, written next to the task's files.
const TRANSCRIPT_FILE: &str = ".labrun-transcript.html";

pub struct SandboxAdapter {
    settings: SandboxSettings,
    builder: ProjectBuilder,
    lifecycle: ContainerLifecycleManager,
    capturer: Arc<dyn Capturer>,
}

impl SandboxAdapter {
    pub fn new(
        settings: SandboxSettings,
        provider: Arc<dyn RuntimeProvider>,
        capturer: Arc<dyn Capturer>,
    ) -> Result<Self> {
        let lifecycle = ContainerLifecycleManager::new(provider, &settings)?;
        Ok(Self {
            builder: ProjectBuilder::new(settings.workspace_root.clone()),
            settings,
            lifecycle,
            capturer,
        })
    }

    /// Adapter with the configured provider and a headless Chrome capturer.
    pub fn from_settings(settings: SandboxSettings, capture: CaptureSettings) -> Result<Self> {
        let provider: Arc<dyn RuntimeProvider> = match settings.provider {
            ProviderKind::Local => Arc::new(LocalProcessProvider::new()),
            ProviderKind::Docker => Arc::new(DockerProvider::new()?),
        };
        info!("Using {} runtime provider", provider.name());
        Self::new(settings, provider, Arc::new(CaptureService::chrome(capture)))
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn lifecycle(&self) -> &ContainerLifecycleManager {
        &self.lifecycle
    }

    /// Check that tasks can run at all: the workspace root is writable and the
    /// provider answers.
    pub async fn preflight(&self) -> Result<()> {
        self.builder
            .ensure_root()
            .await
            .map_err(|e| SandboxError::Unavailable {
                reason: format!(
                    "workspace root {} is not writable: {}",
                    self.builder.root().display(),
                    e
                ),
            })?;

        let provider = self.lifecycle.provider();
        if !provider.is_available().await {
            return Err(SandboxError::Unavailable {
                reason: format!("runtime provider '{}' is not available", provider.name()),
            });
        }
        Ok(())
    }

    /// Run `task` under its deadline. Never fails: every error becomes a
    /// failed result, and the task's resources are released before returning.
    pub async fn execute(&self, task: &Task) -> TaskResult {
        let started = Instant::now();
        info!(
            "Executing task {} ({}, timeout {:?})",
            task.id, task.language, task.timeout
        );

        let deadline = started + task.timeout;
        let mut scope = TaskScope::new(&task.id, self.lifecycle.clone());
        let outcome = tokio::time::timeout_at(
            deadline,
            self.run_pipeline(task, deadline, &mut scope),
        )
        .await;
        scope.release().await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(SandboxError::Timeout { .. })) | Err(_) => {
                let e = SandboxError::Timeout {
                    seconds: task.timeout.as_secs(),
                };
                warn!("Task {}: {}", task.id, e);
                TaskResult::from_error(&task.id, &e)
            }
            Ok(Err(e)) => {
                warn!("Task {} failed ({}): {}", task.id, e.kind().as_str(), e);
                TaskResult::from_error(&task.id, &e)
            }
        };

        let result = result.with_duration(started.elapsed());
        info!(
            "Task {} finished as {:?} in {}ms",
            task.id, result.status, result.duration_ms
        );
        result
    }

    async fn run_pipeline(
        &self,
        task: &Task,
        deadline: Instant,
        scope: &mut TaskScope,
    ) -> Result<TaskResult> {
        match task.language.runtime_kind() {
            RuntimeKind::Batch => self.run_batch(task, scope).await,
            RuntimeKind::Server => self.run_server(task, deadline, scope).await,
        }
    }

    async fn run_batch(&self, task: &Task, scope: &mut TaskScope) -> Result<TaskResult> {
        let entry = task.language.entry_file();
        let command = task
            .language
            .batch_command(entry)
            .ok_or_else(|| SandboxError::InvalidTask {
                task_id: task.id.clone(),
                reason: format!("{} is not a batch language", task.language),
            })?;

        let workspace = scope.attach_workspace(self.builder.materialize(task).await?);
        let workspace_path = workspace.path().to_path_buf();

        let provider = self.lifecycle.provider().clone();
        let config = UnitConfig {
            name: unit_name(&task.id, &Uuid::new_v4()),
            workspace: workspace_path.clone(),
            image: self.settings.images.for_language(task.language).to_string(),
            network: false,
            port: None,
            memory_mb: self.settings.memory_mb,
            cpu_cores: self.settings.cpu_cores,
        };
        let unit = provider.create_unit(&config).await?;
        scope.attach_unit(unit.clone());

        lifecycle::ensure_visible(provider.as_ref(), &unit, &workspace_path).await?;

        let output = provider.run(&unit, &command, &[], task.timeout).await?;
        if output.timed_out {
            return Err(SandboxError::Timeout {
                seconds: task.timeout.as_secs(),
            });
        }

        let mut result = batch_result(&task.id, &output);

        let source = match &task.payload {
            TaskPayload::Single(source) => source.as_str(),
            TaskPayload::Project(files) => files.get(entry).map(String::as_str).unwrap_or_default(),
        };
        let combined = if output.stderr.is_empty() {
            output.stdout.clone()
        } else {
            format!("{}{}", output.stdout, output.stderr)
        };
        let transcript = Transcript {
            language: task.language.as_str(),
            file_name: entry,
            source,
            output: &combined,
            exit_code: output.exit_code,
        };

        let page = workspace_path.join(TRANSCRIPT_FILE);
        let routes = vec!["/".to_string()];
        let captured = match tokio::fs::write(&page, transcript.render()).await {
            Ok(()) => self
                .capturer
                .capture(&task.id, &CaptureTarget::Document { path: page }, &routes)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(format!("failed to write transcript: {}", e)),
        };

        match captured {
            Ok(report) => {
                result.artifacts = report.artifacts;
                result.route_errors = report.route_errors;
            }
            Err(reason) => {
                warn!("Transcript capture for task {} failed: {}", task.id, reason);
                result.route_errors.push(RouteError {
                    route: "/".to_string(),
                    reason,
                });
            }
        }

        Ok(result)
    }

    async fn run_server(
        &self,
        task: &Task,
        deadline: Instant,
        scope: &mut TaskScope,
    ) -> Result<TaskResult> {
        let workspace = scope.attach_workspace(self.builder.materialize(task).await?);
        let plan = LaunchPlan::for_server(task.language, workspace, &self.settings.images)
            .ok_or_else(|| SandboxError::InvalidTask {
                task_id: task.id.clone(),
                reason: format!("{} is not a server language", task.language),
            })?;

        // Installs may use whatever is left of the task deadline.
        let install_budget = deadline.saturating_duration_since(Instant::now());
        let handle = self.lifecycle.start(workspace, &plan, install_budget).await?;
        let handle = scope.attach_handle(handle);

        self.lifecycle
            .await_ready(handle, self.settings.ready_timeout(task.language))
            .await?;

        let target = CaptureTarget::Server {
            base_url: self.lifecycle.base_address(handle),
        };
        let report = self.capturer.capture(&task.id, &target, &task.routes).await?;
        let stdout = self.lifecycle.log_tail(handle).await;

        if !report.has_artifacts() {
            error!("Task {} produced no artifacts", task.id);
            return Err(SandboxError::NoArtifacts {
                summary: report.error_summary(),
            });
        }

        let mut result = TaskResult::completed(&task.id);
        result.stdout = stdout;
        result.artifacts = report.artifacts;
        result.route_errors = report.route_errors;
        Ok(result)
    }
}

/// Status of a batch run from its exit code.
fn batch_result(task_id: &str, output: &CommandOutput) -> TaskResult {
    let mut result = match output.exit_code {
        Some(0) => TaskResult::completed(task_id),
        code => {
            let e = SandboxError::Runtime {
                exit_code: code.unwrap_or(-1),
                stderr: output.stderr.trim_end().to_string(),
            };
            TaskResult::failed(task_id, ErrorKind::RuntimeError, e.to_string())
        }
    };
    result.stdout = output.stdout.clone();
    result.exit_code = output.exit_code;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_result_success() {
        let output = CommandOutput {
            exit_code: Some(0),
            stdout: "hello\n".to_string(),
            ..CommandOutput::default()
        };
        let result = batch_result("t1", &output);
        assert!(result.is_completed());
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.exit_code, Some(0));
    }

    #[test]
    fn test_batch_result_nonzero_exit_keeps_stderr() {
        let output = CommandOutput {
            exit_code: Some(2),
            stdout: "partial".to_string(),
            stderr: "Traceback: boom\n".to_string(),
            timed_out: false,
        };
        let result = batch_result("t1", &output);
        assert_eq!(result.error_kind, Some(ErrorKind::RuntimeError));
        assert_eq!(result.stdout, "partial");
        assert!(result.error.unwrap().contains("Traceback: boom"));
    }
}
