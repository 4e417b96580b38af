// ABOUTME: Runtime provider trait and shared types for isolated execution units
// ABOUTME: A unit is a container or process group that sees one workspace

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub mod docker;
pub mod process;

pub use docker::DockerProvider;
pub use process::LocalProcessProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Failed to spawn '{command}': {error}")]
    SpawnError { command: String, error: String },

    #[error("Unknown runtime unit: {0}")]
    UnknownUnit(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Identifier of a live unit, unique per provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId(pub String);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to create a unit.
#[derive(Debug, Clone)]
pub struct UnitConfig {
    /// Human-readable name, also the container name for Docker.
    pub name: String,
    pub workspace: PathBuf,
    pub image: String,
    /// Batch units get no network at all.
    pub network: bool,
    /// Host port forwarded to the same port inside the unit.
    pub port: Option<u16>,
    pub memory_mb: u64,
    pub cpu_cores: f32,
}

/// Captured result of a command run to completion.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the command was killed before exiting.
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Backend that creates and controls isolated units.
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the backend can be used right now.
    async fn is_available(&self) -> bool;

    /// Host alias from which the orchestrator reaches a unit's forwarded port.
    fn host_alias(&self) -> String;

    /// Create a unit with the workspace visible at its working directory.
    async fn create_unit(&self, config: &UnitConfig) -> Result<UnitId>;

    /// Entries of the unit's working directory, as seen from inside the unit.
    async fn list_workdir(&self, unit: &UnitId) -> Result<Vec<String>>;

    /// Run `command` through `sh -c` to completion, killing it after `timeout`.
    async fn run(
        &self,
        unit: &UnitId,
        command: &str,
        env: &[(String, String)],
        timeout: Duration,
    ) -> Result<CommandOutput>;

    /// Start `command` through `sh -c` in the background, capturing its output.
    async fn spawn(&self, unit: &UnitId, command: &str, env: &[(String, String)]) -> Result<()>;

    /// Exit code of the background command once it has exited.
    async fn exit_status(&self, unit: &UnitId) -> Result<Option<i64>>;

    /// Captured output lines of the background command, oldest first.
    async fn logs(&self, unit: &UnitId) -> Result<Vec<String>>;

    /// Terminate everything in the unit and forget it. Removing a unit that is
    /// already gone succeeds.
    async fn remove_unit(&self, unit: &UnitId) -> Result<()>;
}

/// Bounded line buffer shared by the providers for background output.
pub(crate) mod log_buffer {
    use std::collections::VecDeque;

    /// Keep only the most recent lines of a long-running command.
    pub const MAX_LINES: usize = 1000;

    pub fn push(buffer: &mut VecDeque<String>, line: String) {
        buffer.push_back(line);
        if buffer.len() > MAX_LINES {
            buffer.pop_front();
        }
    }
}
