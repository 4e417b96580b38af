// ABOUTME: Seam between the orchestrator and whatever runs a task
// ABOUTME: Implemented by the sandbox adapter; tests substitute scripted executors

use async_trait::async_trait;
use labrun_sandbox::{SandboxAdapter, Task, TaskResult};

#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Whether tasks can be run at all. The error explains why not.
    async fn preflight(&self) -> Result<(), String>;

    /// Run one task to a terminal result. Must not fail.
    async fn execute(&self, task: &Task) -> TaskResult;
}

#[async_trait]
impl TaskExecutor for SandboxAdapter {
    async fn preflight(&self) -> Result<(), String> {
        SandboxAdapter::preflight(self)
            .await
            .map_err(|e| e.to_string())
    }

    async fn execute(&self, task: &Task) -> TaskResult {
        SandboxAdapter::execute(self, task).await
    }
}
