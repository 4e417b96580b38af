// ABOUTME: Shared fixtures for sandbox integration tests
// ABOUTME: A scripted runtime provider, an HTTP-probing capturer and fast settings

#![allow(dead_code)]

use async_trait::async_trait;
use labrun_capture::{
    Artifact, CaptureError, CaptureReport, CaptureResult, CaptureTarget, Capturer, RouteError,
};
use labrun_sandbox::providers::{CommandOutput, ProviderError, Result as ProviderResult};
use labrun_sandbox::{
    ProviderKind, RuntimeProvider, SandboxAdapter, SandboxSettings, TaskLimits, UnitConfig, UnitId,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Settings for tests: local provider, short polls, workspaces under `root`.
pub fn fast_settings(root: &Path) -> SandboxSettings {
    SandboxSettings {
        provider: ProviderKind::Local,
        workspace_root: root.to_path_buf(),
        poll_interval: Duration::from_millis(50),
        probe_timeout: Duration::from_millis(500),
        node_ready_timeout: Duration::from_secs(5),
        html_ready_timeout: Duration::from_secs(5),
        limits: TaskLimits::default(),
        ..SandboxSettings::default()
    }
}

pub fn workspace_entries(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

/// Serve `status` to every request on `port` until aborted.
pub async fn serve_status(port: u16, status: &'static str) -> JoinHandle<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-type: text/html\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                    status
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    })
}

/// How units of the scripted provider behave once their command is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer HTTP on the unit's port.
    Serve,
    /// Exit with code 1 after logging a module error.
    Crash,
    /// Never listen and never exit.
    Hang,
    /// The install step never finishes.
    StuckInstall,
}

struct ScriptedUnit {
    workdir: PathBuf,
    port: Option<u16>,
    server: Option<JoinHandle<()>>,
    spawned: bool,
}

/// Provider that fakes server units in-process. Batch commands are not
/// supported; use `LocalProcessProvider` for those.
pub struct ScriptedProvider {
    behavior: Behavior,
    units: Mutex<HashMap<String, ScriptedUnit>>,
    pub ports: Mutex<Vec<u16>>,
    pub removed: Mutex<Vec<String>>,
    /// Commands run or spawned, in order.
    pub commands: Mutex<Vec<String>>,
    /// Workspaces of created units, in order.
    pub workdirs: Mutex<Vec<PathBuf>>,
}

impl ScriptedProvider {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            units: Mutex::new(HashMap::new()),
            ports: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            workdirs: Mutex::new(Vec::new()),
        }
    }

    pub fn live_units(&self) -> usize {
        self.units.lock().unwrap().len()
    }
}

#[async_trait]
impl RuntimeProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn host_alias(&self) -> String {
        "127.0.0.1".to_string()
    }

    async fn create_unit(&self, config: &UnitConfig) -> ProviderResult<UnitId> {
        if let Some(port) = config.port {
            self.ports.lock().unwrap().push(port);
        }
        self.workdirs.lock().unwrap().push(config.workspace.clone());
        self.units.lock().unwrap().insert(
            config.name.clone(),
            ScriptedUnit {
                workdir: config.workspace.clone(),
                port: config.port,
                server: None,
                spawned: false,
            },
        );
        Ok(UnitId(config.name.clone()))
    }

    async fn list_workdir(&self, unit: &UnitId) -> ProviderResult<Vec<String>> {
        let workdir = self
            .units
            .lock()
            .unwrap()
            .get(&unit.0)
            .map(|u| u.workdir.clone())
            .ok_or_else(|| ProviderError::UnknownUnit(unit.0.clone()))?;
        let entries = std::fs::read_dir(workdir)
            .map_err(|e| ProviderError::InternalError(e.to_string()))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        Ok(entries)
    }

    /// Only install steps run here; they succeed unless the behavior is
    /// `StuckInstall`, which holds until the timeout.
    async fn run(
        &self,
        unit: &UnitId,
        command: &str,
        _env: &[(String, String)],
        timeout: Duration,
    ) -> ProviderResult<CommandOutput> {
        if !self.units.lock().unwrap().contains_key(&unit.0) {
            return Err(ProviderError::UnknownUnit(unit.0.clone()));
        }
        self.commands.lock().unwrap().push(command.to_string());

        if self.behavior == Behavior::StuckInstall {
            tokio::time::sleep(timeout).await;
            return Ok(CommandOutput {
                timed_out: true,
                ..CommandOutput::default()
            });
        }
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: "added 0 packages\n".to_string(),
            ..CommandOutput::default()
        })
    }

    async fn spawn(&self, unit: &UnitId, command: &str, _env: &[(String, String)]) -> ProviderResult<()> {
        self.commands.lock().unwrap().push(command.to_string());
        let port = {
            let mut units = self.units.lock().unwrap();
            let scripted = units
                .get_mut(&unit.0)
                .ok_or_else(|| ProviderError::UnknownUnit(unit.0.clone()))?;
            scripted.spawned = true;
            scripted.port
        };

        if self.behavior == Behavior::Serve {
            let port = port.ok_or_else(|| ProviderError::InternalError("no port".to_string()))?;
            let server = serve_status(port, "200 OK").await;
            if let Some(scripted) = self.units.lock().unwrap().get_mut(&unit.0) {
                scripted.server = Some(server);
            }
        }
        Ok(())
    }

    async fn exit_status(&self, unit: &UnitId) -> ProviderResult<Option<i64>> {
        let units = self.units.lock().unwrap();
        let scripted = units
            .get(&unit.0)
            .ok_or_else(|| ProviderError::UnknownUnit(unit.0.clone()))?;
        Ok(match self.behavior {
            Behavior::Crash if scripted.spawned => Some(1),
            _ => None,
        })
    }

    async fn logs(&self, _unit: &UnitId) -> ProviderResult<Vec<String>> {
        Ok(match self.behavior {
            Behavior::Crash => vec![
                "> app@1.0.0 dev".to_string(),
                "Error: Cannot find module 'express'".to_string(),
            ],
            _ => vec!["listening".to_string()],
        })
    }

    async fn remove_unit(&self, unit: &UnitId) -> ProviderResult<()> {
        if let Some(scripted) = self.units.lock().unwrap().remove(&unit.0) {
            if let Some(server) = scripted.server {
                server.abort();
            }
            self.removed.lock().unwrap().push(unit.0.clone());
        }
        Ok(())
    }
}

/// Capturer that issues a real GET per route instead of driving a browser.
/// Documents are "captured" if the file exists.
pub struct FetchingCapturer {
    artifact_dir: PathBuf,
    client: reqwest::Client,
    pub targets: Mutex<Vec<CaptureTarget>>,
}

impl FetchingCapturer {
    pub fn new(artifact_dir: &Path) -> Self {
        Self {
            artifact_dir: artifact_dir.to_path_buf(),
            client: reqwest::Client::new(),
            targets: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Capturer for FetchingCapturer {
    async fn capture(
        &self,
        task_id: &str,
        target: &CaptureTarget,
        routes: &[String],
    ) -> CaptureResult<CaptureReport> {
        self.targets.lock().unwrap().push(target.clone());
        let dir = self.artifact_dir.join(task_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut report = CaptureReport::default();
        let mut refused = 0;
        for (index, route) in routes.iter().enumerate() {
            let reachable = match target {
                CaptureTarget::Server { .. } => {
                    self.client.get(target.url_for(route)).send().await.is_ok()
                }
                CaptureTarget::Document { path } => path.exists(),
            };
            if reachable {
                let path = dir.join(format!("{:02}.png", index));
                tokio::fs::write(&path, b"png").await?;
                report.artifacts.push(Artifact {
                    route: route.clone(),
                    path,
                });
            } else {
                refused += 1;
                report.route_errors.push(RouteError {
                    route: route.clone(),
                    reason: "connection refused".to_string(),
                });
            }
        }

        if refused == routes.len() && !routes.is_empty() {
            return Err(CaptureError::Unreachable {
                target: target.describe(),
                routes: refused,
            });
        }
        Ok(report)
    }
}

/// Capturer whose browser never starts.
pub struct BrokenCapturer;

#[async_trait]
impl Capturer for BrokenCapturer {
    async fn capture(
        &self,
        _task_id: &str,
        _target: &CaptureTarget,
        _routes: &[String],
    ) -> CaptureResult<CaptureReport> {
        Err(CaptureError::Browser {
            reason: "chrome not found".to_string(),
        })
    }
}

pub fn adapter(
    settings: SandboxSettings,
    provider: Arc<dyn RuntimeProvider>,
    capturer: Arc<dyn Capturer>,
) -> SandboxAdapter {
    SandboxAdapter::new(settings, provider, capturer).unwrap()
}
