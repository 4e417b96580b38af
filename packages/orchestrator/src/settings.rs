// ABOUTME: Orchestrator settings loaded from the environment

use labrun_config::constants::LABRUN_MAX_CONCURRENT_TASKS;
use labrun_config::env_validated;
use labrun_sandbox::TaskLimits;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Tasks of one job executing at the same time.
    pub max_concurrent_tasks: usize,
    pub limits: TaskLimits,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            limits: TaskLimits::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_env(limits: TaskLimits) -> Self {
        Self {
            max_concurrent_tasks: env_validated(LABRUN_MAX_CONCURRENT_TASKS, 4, |v| v > 0),
            limits,
        }
    }
}
