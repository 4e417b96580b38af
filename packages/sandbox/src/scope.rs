// ABOUTME: Per-task resource scope
// ABOUTME: Owns a task's workspace, runtime unit and port lease and releases them exactly once

use crate::lifecycle::{ContainerLifecycleManager, RuntimeHandle};
use crate::providers::UnitId;
use crate::workspace::Workspace;
use tracing::{debug, warn};

/// Everything a running task holds. [`TaskScope::release`] is awaited after
/// every pipeline; `Drop` is the fallback when it never ran.
pub struct TaskScope {
    task_id: String,
    lifecycle: ContainerLifecycleManager,
    workspace: Option<Workspace>,
    handle: Option<RuntimeHandle>,
    batch_unit: Option<UnitId>,
    released: bool,
}

impl TaskScope {
    pub fn new(task_id: &str, lifecycle: ContainerLifecycleManager) -> Self {
        Self {
            task_id: task_id.to_string(),
            lifecycle,
            workspace: None,
            handle: None,
            batch_unit: None,
            released: false,
        }
    }

    pub fn attach_workspace(&mut self, workspace: Workspace) -> &Workspace {
        self.workspace.insert(workspace)
    }

    pub fn attach_handle(&mut self, handle: RuntimeHandle) -> &RuntimeHandle {
        self.handle.insert(handle)
    }

    pub fn attach_unit(&mut self, unit: UnitId) {
        self.batch_unit = Some(unit);
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    pub fn handle(&self) -> Option<&RuntimeHandle> {
        self.handle.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stop the server unit, remove the batch unit, delete the workspace.
    /// Failures are logged; calling again is a no-op.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }

        if let Some(mut handle) = self.handle.take() {
            self.lifecycle.stop(&mut handle).await;
        }

        if let Some(unit) = self.batch_unit.take() {
            if let Err(e) = self.lifecycle.provider().remove_unit(&unit).await {
                warn!("Failed to remove unit {}: {}", unit, e);
            }
        }

        if let Some(mut workspace) = self.workspace.take() {
            if let Err(e) = workspace.remove().await {
                warn!(
                    "Failed to remove workspace {}: {}",
                    workspace.path().display(),
                    e
                );
            }
        }

        self.released = true;
        debug!("Released resources of task {}", self.task_id);
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let handle = self.handle.take();
        let unit = self.batch_unit.take();
        if handle.is_some() || unit.is_some() {
            let lifecycle = self.lifecycle.clone();
            let task_id = self.task_id.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Some(mut handle) = handle {
                            lifecycle.stop(&mut handle).await;
                        }
                        if let Some(unit) = unit {
                            if let Err(e) = lifecycle.provider().remove_unit(&unit).await {
                                warn!("Failed to remove unit {}: {}", unit, e);
                            }
                        }
                        debug!("Released dropped scope of task {}", task_id);
                    });
                }
                Err(_) => warn!(
                    "Task {} dropped outside a runtime; its unit was not removed",
                    self.task_id
                ),
            }
        }
        // The workspace removes its own directory on drop.
    }
}
