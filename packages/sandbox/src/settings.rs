// ABOUTME: Sandbox settings loaded from the environment
// ABOUTME: Provider choice, workspace root, readiness timing, resource caps and runtime images

use crate::types::{Language, TaskLimits};
use labrun_config::constants::*;
use labrun_config::{env_millis, env_or, env_path_or, env_secs, env_string, env_validated};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which backend runs isolated units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Local,
    #[default]
    Docker,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Docker => "docker",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "process" => Ok(ProviderKind::Local),
            "docker" => Ok(ProviderKind::Docker),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Container images used by the Docker provider, one per runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeImages {
    pub python: String,
    pub node: String,
    pub gcc: String,
    pub java: String,
    pub shell: String,
}

impl Default for RuntimeImages {
    fn default() -> Self {
        Self {
            python: "python:3.10-slim".to_string(),
            node: "node:20-alpine".to_string(),
            gcc: "gcc:13".to_string(),
            java: "eclipse-temurin:21".to_string(),
            shell: "alpine:3.20".to_string(),
        }
    }
}

impl RuntimeImages {
    /// Image that carries the toolchain for `language`. The static html
    /// server runs on `python3 -m http.server`.
    pub fn for_language(&self, language: Language) -> &str {
        match language {
            Language::Python | Language::Html => &self.python,
            Language::JavaScript | Language::Node => &self.node,
            Language::C | Language::Cpp => &self.gcc,
            Language::Java => &self.java,
            Language::Shell => &self.shell,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub provider: ProviderKind,
    pub workspace_root: PathBuf,
    /// Overrides the provider's host alias when set.
    pub runtime_host: Option<String>,
    pub poll_interval: Duration,
    /// Per-request timeout of a single readiness probe.
    pub probe_timeout: Duration,
    pub node_ready_timeout: Duration,
    pub html_ready_timeout: Duration,
    pub limits: TaskLimits,
    pub memory_mb: u64,
    pub cpu_cores: f32,
    pub images: RuntimeImages,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            workspace_root: std::env::temp_dir().join("labrun").join("workspaces"),
            runtime_host: None,
            poll_interval: Duration::from_millis(5000),
            probe_timeout: Duration::from_millis(2000),
            node_ready_timeout: Duration::from_secs(120),
            html_ready_timeout: Duration::from_secs(10),
            limits: TaskLimits::default(),
            memory_mb: 512,
            cpu_cores: 0.5,
            images: RuntimeImages::default(),
        }
    }
}

impl SandboxSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let limits = TaskLimits {
            max_source_bytes: env_validated(
                LABRUN_MAX_SOURCE_BYTES,
                defaults.limits.max_source_bytes,
                |v| v > 0,
            ),
            batch_timeout: env_secs(LABRUN_BATCH_TIMEOUT_SECS, 30),
            html_timeout: defaults.limits.html_timeout,
            server_timeout: env_secs(LABRUN_SERVER_TIMEOUT_SECS, 180),
            max_timeout: defaults.limits.max_timeout,
        };

        Self {
            provider: env_or(LABRUN_PROVIDER, defaults.provider),
            workspace_root: env_path_or(LABRUN_WORKSPACE_ROOT, defaults.workspace_root),
            runtime_host: env_string(LABRUN_RUNTIME_HOST),
            poll_interval: env_millis(LABRUN_POLL_INTERVAL_MS, 5000),
            probe_timeout: env_millis(LABRUN_PROBE_TIMEOUT_MS, 2000),
            node_ready_timeout: env_secs(LABRUN_NODE_READY_TIMEOUT_SECS, 120),
            html_ready_timeout: env_secs(LABRUN_HTML_READY_TIMEOUT_SECS, 10),
            limits,
            memory_mb: env_validated(LABRUN_MEMORY_MB, defaults.memory_mb, |v| v >= 64),
            cpu_cores: env_validated(LABRUN_CPU_CORES, defaults.cpu_cores, |v| v > 0.0),
            images: defaults.images,
        }
    }

    /// Readiness budget for a server language.
    pub fn ready_timeout(&self, language: Language) -> Duration {
        match language {
            Language::Html => self.html_ready_timeout,
            _ => self.node_ready_timeout,
        }
    }
}
