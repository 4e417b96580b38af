// ABOUTME: Container lifecycle manager for server tasks
// ABOUTME: Leases a port, boots the unit, polls it until ready or crashed, and tears it down

use crate::error::{BuildError, ReadinessError, Result, SandboxError};
use crate::ports::{PortArena, PortLease};
use crate::providers::{RuntimeProvider, UnitConfig, UnitId};
use crate::settings::{RuntimeImages, SandboxSettings};
use crate::types::Language;
use crate::workspace::Workspace;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lines of captured server output carried in readiness errors and results.
pub const LOG_TAIL_LINES: usize = 200;

const NPM_INSTALL: &str = "npm install --no-audit --no-fund --loglevel=error";

/// What to run inside a server unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub image: String,
    pub install: Option<String>,
    pub run: String,
}

impl LaunchPlan {
    /// Plan for a materialized server workspace. `None` for batch languages.
    pub fn for_server(
        language: Language,
        workspace: &Workspace,
        images: &RuntimeImages,
    ) -> Option<Self> {
        let image = images.for_language(language).to_string();
        match language {
            Language::Html => Some(Self {
                image,
                install: None,
                run: "python3 -m http.server \"$PORT\" --bind 0.0.0.0".to_string(),
            }),
            Language::Node => {
                // Vite ignores PORT; it has to be told on the command line.
                let run = match workspace.dev_script() {
                    Some(script) if script.contains("vite") => {
                        "npm run dev -- --port \"$PORT\" --host 0.0.0.0 --strictPort".to_string()
                    }
                    _ => "npm run dev".to_string(),
                };
                Some(Self {
                    image,
                    install: Some(NPM_INSTALL.to_string()),
                    run,
                })
            }
            _ => None,
        }
    }

}

/// A live server unit. Never reused across tasks.
#[derive(Debug)]
pub struct RuntimeHandle {
    token: Uuid,
    unit: UnitId,
    port: u16,
    host_alias: String,
    lease: Option<PortLease>,
    stopped: bool,
}

impl RuntimeHandle {
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host_alias(&self) -> &str {
        &self.host_alias
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// States of the readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Starting,
    Polling { attempt: u32 },
    Ready,
    Crashed { exit_code: Option<i64> },
    TimedOut,
}

/// Removes a created unit unless disarmed. Covers failures and cancellation
/// between `create_unit` and a handle being returned.
struct PendingUnit {
    provider: Arc<dyn RuntimeProvider>,
    unit: Option<UnitId>,
}

impl PendingUnit {
    fn disarm(mut self) {
        self.unit.take();
    }
}

impl Drop for PendingUnit {
    fn drop(&mut self) {
        let Some(unit) = self.unit.take() else {
            return;
        };
        let provider = self.provider.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = provider.remove_unit(&unit).await {
                        warn!("Failed to remove abandoned unit {}: {}", unit, e);
                    }
                });
            }
            Err(_) => warn!("No runtime to remove abandoned unit {}", unit),
        }
    }
}

#[derive(Clone)]
pub struct ContainerLifecycleManager {
    provider: Arc<dyn RuntimeProvider>,
    ports: PortArena,
    http: reqwest::Client,
    poll_interval: Duration,
    host_override: Option<String>,
    memory_mb: u64,
    cpu_cores: f32,
}

impl ContainerLifecycleManager {
    pub fn new(provider: Arc<dyn RuntimeProvider>, settings: &SandboxSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.probe_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SandboxError::Unavailable {
                reason: format!("failed to build readiness probe client: {}", e),
            })?;

        Ok(Self {
            provider,
            ports: PortArena::new(),
            http,
            poll_interval: settings.poll_interval,
            host_override: settings.runtime_host.clone(),
            memory_mb: settings.memory_mb,
            cpu_cores: settings.cpu_cores,
        })
    }

    pub fn provider(&self) -> &Arc<dyn RuntimeProvider> {
        &self.provider
    }

    pub fn ports(&self) -> &PortArena {
        &self.ports
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Lease a port, create the unit on it, run the install step to
    /// completion and launch the server in the background.
    ///
    /// The install step gets at most `install_timeout`; the readiness budget
    /// passed to [`Self::await_ready`] only covers server boot.
    pub async fn start(
        &self,
        workspace: &Workspace,
        plan: &LaunchPlan,
        install_timeout: Duration,
    ) -> Result<RuntimeHandle> {
        let lease = self.ports.lease()?;
        let port = lease.port();
        let token = Uuid::new_v4();

        let config = UnitConfig {
            name: unit_name(workspace.task_id(), &token),
            workspace: workspace.path().to_path_buf(),
            image: plan.image.clone(),
            network: true,
            port: Some(port),
            memory_mb: self.memory_mb,
            cpu_cores: self.cpu_cores,
        };

        let unit = self.provider.create_unit(&config).await?;
        let pending = PendingUnit {
            provider: self.provider.clone(),
            unit: Some(unit.clone()),
        };

        ensure_visible(self.provider.as_ref(), &unit, workspace.path()).await?;

        let env = vec![
            ("PORT".to_string(), port.to_string()),
            ("HOST".to_string(), "0.0.0.0".to_string()),
        ];
        if let Some(install) = &plan.install {
            self.install(&unit, install, &env, install_timeout).await?;
        }
        self.provider.spawn(&unit, &plan.run, &env).await?;

        pending.disarm();
        let host_alias = self
            .host_override
            .clone()
            .unwrap_or_else(|| self.provider.host_alias());

        info!(
            "Started unit {} for task {} on {}:{}",
            unit,
            workspace.task_id(),
            host_alias,
            port
        );

        Ok(RuntimeHandle {
            token,
            unit,
            port,
            host_alias,
            lease: Some(lease),
            stopped: false,
        })
    }

    async fn install(
        &self,
        unit: &UnitId,
        command: &str,
        env: &[(String, String)],
        timeout: Duration,
    ) -> Result<()> {
        info!("Installing dependencies in unit {}", unit);
        let output = self.provider.run(unit, command, env, timeout).await?;
        if output.timed_out {
            warn!("Install in unit {} did not finish within {:?}", unit, timeout);
            return Err(SandboxError::Timeout {
                seconds: timeout.as_secs(),
            });
        }
        match output.exit_code {
            Some(0) => Ok(()),
            exit_code => Err(BuildError::Install {
                exit_code,
                log: tail_lines(&format!("{}{}", output.stdout, output.stderr)),
            }
            .into()),
        }
    }

    /// Poll until the server answers, exits, or `timeout` elapses.
    ///
    /// Every cycle checks for an exit first, so a crash is reported on the
    /// cycle it happens rather than after the full budget.
    pub async fn await_ready(
        &self,
        handle: &RuntimeHandle,
        timeout: Duration,
    ) -> std::result::Result<(), ReadinessError> {
        let url = self.base_address(handle);
        let deadline = Instant::now() + timeout;
        let mut state = ReadinessState::Starting;

        loop {
            state = match state {
                ReadinessState::Starting => {
                    debug!("Waiting up to {:?} for {} at {}", timeout, handle.unit, url);
                    ReadinessState::Polling { attempt: 1 }
                }
                ReadinessState::Polling { attempt } => {
                    if let Some(exit_code) = self.exited(handle).await {
                        ReadinessState::Crashed { exit_code }
                    } else if self.probe(&url).await {
                        debug!("{} answered after {} probe(s)", url, attempt);
                        ReadinessState::Ready
                    } else {
                        let now = Instant::now();
                        if now >= deadline {
                            ReadinessState::TimedOut
                        } else {
                            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
                            ReadinessState::Polling {
                                attempt: attempt + 1,
                            }
                        }
                    }
                }
                ReadinessState::Ready => {
                    info!("Unit {} is ready at {}", handle.unit, url);
                    return Ok(());
                }
                ReadinessState::Crashed { exit_code } => {
                    warn!(
                        "Unit {} exited before becoming ready (exit code {:?})",
                        handle.unit, exit_code
                    );
                    return Err(ReadinessError::Crashed {
                        exit_code,
                        log: self.log_tail(handle).await,
                    });
                }
                ReadinessState::TimedOut => {
                    warn!("Unit {} not ready after {:?}", handle.unit, timeout);
                    return Err(ReadinessError::Timeout {
                        waited_secs: timeout.as_secs(),
                        log: self.log_tail(handle).await,
                    });
                }
            };
        }
    }

    /// Terminate and remove the unit and return its port. Safe to call more
    /// than once; provider errors are logged, not returned.
    pub async fn stop(&self, handle: &mut RuntimeHandle) {
        if handle.stopped {
            return;
        }
        if let Err(e) = self.provider.remove_unit(&handle.unit).await {
            warn!("Failed to remove unit {}: {}", handle.unit, e);
        }
        handle.lease.take();
        handle.stopped = true;
        debug!("Stopped unit {} (port {} released)", handle.unit, handle.port);
    }

    pub fn base_address(&self, handle: &RuntimeHandle) -> String {
        format!("http://{}:{}", handle.host_alias, handle.port)
    }

    /// Last lines of the unit's captured output, joined.
    pub async fn log_tail(&self, handle: &RuntimeHandle) -> String {
        match self.provider.logs(&handle.unit).await {
            Ok(lines) => {
                let skip = lines.len().saturating_sub(LOG_TAIL_LINES);
                lines[skip..].join("\n")
            }
            Err(e) => {
                debug!("No logs for unit {}: {}", handle.unit, e);
                String::new()
            }
        }
    }

    async fn exited(&self, handle: &RuntimeHandle) -> Option<Option<i64>> {
        match self.provider.exit_status(&handle.unit).await {
            Ok(Some(code)) => Some(Some(code)),
            Ok(None) => None,
            Err(e) => {
                warn!("Lost track of unit {}: {}", handle.unit, e);
                Some(None)
            }
        }
    }

    /// Any HTTP response counts, error statuses included.
    async fn probe(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) => {
                debug!("Probe {} -> {}", url, response.status());
                true
            }
            Err(e) => {
                debug!("Probe {} failed: {}", url, e);
                false
            }
        }
    }
}

fn tail_lines(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let skip = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines[skip..].join("\n")
}

/// Fail fast when the unit cannot see the workspace it was given.
pub async fn ensure_visible(
    provider: &dyn RuntimeProvider,
    unit: &UnitId,
    location: &Path,
) -> Result<()> {
    let entries = provider.list_workdir(unit).await?;
    if entries.is_empty() {
        return Err(BuildError::NotVisible {
            location: location.display().to_string(),
        }
        .into());
    }
    debug!("Unit {} sees {} entries", unit, entries.len());
    Ok(())
}

/// Unit (and container) name: `labrun-<task>-<token>`, restricted to
/// characters Docker accepts.
pub fn unit_name(task_id: &str, token: &Uuid) -> String {
    let task: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .take(48)
        .collect();
    let token = token.simple().to_string();
    format!("labrun-{}-{}", task, &token[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::ProjectBuilder;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_unit_name_is_docker_safe() {
        let token = Uuid::new_v4();
        let name = unit_name("demo task #1", &token);
        assert!(name.starts_with("labrun-demo-task--1-"));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c)));
        assert_ne!(name, unit_name("demo task #1", &Uuid::new_v4()));
    }

    #[test]
    fn test_tail_lines_keeps_latest() {
        let output: String = (0..250).map(|i| format!("line {}\n", i)).collect();
        let tail = tail_lines(&output);
        assert_eq!(tail.lines().count(), LOG_TAIL_LINES);
        assert!(tail.starts_with("line 50"));
        assert!(tail.ends_with("line 249"));
    }

    #[tokio::test]
    async fn test_launch_plans() {
        let temp = TempDir::new().unwrap();
        let builder = ProjectBuilder::new(temp.path());
        let images = RuntimeImages::default();

        let html = builder
            .materialize_files(
                "h",
                BTreeMap::from([("index.html".to_string(), "<p>hi</p>".to_string())]),
                Language::Html,
            )
            .await
            .unwrap();
        let plan = LaunchPlan::for_server(Language::Html, &html, &images).unwrap();
        assert_eq!(plan.install, None);
        assert!(plan.run.contains("http.server"));

        let vite = builder
            .materialize_files(
                "v",
                BTreeMap::from([(
                    "package.json".to_string(),
                    r#"{"scripts":{"dev":"vite"}}"#.to_string(),
                )]),
                Language::Node,
            )
            .await
            .unwrap();
        let plan = LaunchPlan::for_server(Language::Node, &vite, &images).unwrap();
        assert!(plan.install.as_deref().unwrap().starts_with("npm install"));
        assert!(plan.run.contains("--strictPort"));

        let plain = builder
            .materialize_files(
                "n",
                BTreeMap::from([("index.js".to_string(), "1".to_string())]),
                Language::Node,
            )
            .await
            .unwrap();
        let plan = LaunchPlan::for_server(Language::Node, &plain, &images).unwrap();
        assert_eq!(plan.run, "npm run dev");

        assert!(LaunchPlan::for_server(Language::Python, &plain, &images).is_none());
    }
}
