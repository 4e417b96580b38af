// ABOUTME: Local process provider: each unit is a workspace directory plus a process group
// ABOUTME: Captures background output line by line and stops groups with SIGTERM then SIGKILL

use super::{
    log_buffer, CommandOutput, ProviderError, Result, RuntimeProvider, UnitConfig, UnitId,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long output readers get to drain after the process exits.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

struct LocalUnit {
    workdir: PathBuf,
    child: Option<Child>,
    /// Process group of the background command, kept after the child is reaped.
    pgid: Option<u32>,
    exit_code: Option<i64>,
    readers: Vec<JoinHandle<()>>,
}

/// Runs units as plain host processes.
///
/// Units share the host network and filesystem; only the working directory and
/// process group are private. Use [`super::DockerProvider`] where network
/// isolation is required.
#[derive(Clone)]
pub struct LocalProcessProvider {
    units: Arc<RwLock<HashMap<String, LocalUnit>>>,
    unit_logs: Arc<RwLock<HashMap<String, VecDeque<String>>>>,
    stop_grace: Duration,
}

impl Default for LocalProcessProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalProcessProvider {
    pub fn new() -> Self {
        Self::with_stop_grace(Duration::from_secs(3))
    }

    /// Provider that waits `stop_grace` after SIGTERM before sending SIGKILL.
    pub fn with_stop_grace(stop_grace: Duration) -> Self {
        Self {
            units: Arc::new(RwLock::new(HashMap::new())),
            unit_logs: Arc::new(RwLock::new(HashMap::new())),
            stop_grace,
        }
    }

    pub async fn unit_count(&self) -> usize {
        self.units.read().await.len()
    }

    async fn workdir(&self, unit: &UnitId) -> Result<PathBuf> {
        self.units
            .read()
            .await
            .get(&unit.0)
            .map(|u| u.workdir.clone())
            .ok_or_else(|| ProviderError::UnknownUnit(unit.0.clone()))
    }

    fn shell(command: &str, workdir: &Path, env: &[(String, String)]) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(workdir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    async fn add_log(logs: &Arc<RwLock<HashMap<String, VecDeque<String>>>>, unit: &str, line: String) {
        let mut logs = logs.write().await;
        let buffer = logs.entry(unit.to_string()).or_insert_with(VecDeque::new);
        log_buffer::push(buffer, line);
    }

    /// Take stdout/stderr from the child and stream them into the unit's log.
    fn capture_output(&self, unit: &str, child: &mut Child) -> Vec<JoinHandle<()>> {
        let mut readers = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            let logs = self.unit_logs.clone();
            let unit = unit.to_string();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    Self::add_log(&logs, &unit, line).await;
                }
            }));
        }

        if let Some(stderr) = child.stderr.take() {
            let logs = self.unit_logs.clone();
            let unit = unit.to_string();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    Self::add_log(&logs, &unit, line).await;
                }
            }));
        }

        readers
    }

    /// Stop a process group: SIGTERM, wait up to the grace period, then SIGKILL.
    async fn kill_group(&self, unit: &str, child: &mut Child, pgid: Option<u32>) {
        let Some(pid) = pgid else {
            let _ = child.start_kill();
            return;
        };

        if matches!(child.try_wait(), Ok(Some(_))) {
            // Leader already exited; stray group members still get SIGKILL.
            #[cfg(unix)]
            let _ = signal_group(pid, nix::sys::signal::Signal::SIGKILL);
            return;
        }

        #[cfg(unix)]
        {
            if let Err(e) = signal_group(pid, nix::sys::signal::Signal::SIGTERM) {
                debug!("SIGTERM to group {} of unit {} failed: {}", pid, unit, e);
            }

            let deadline = tokio::time::Instant::now() + self.stop_grace;
            while tokio::time::Instant::now() < deadline {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    info!("Unit {} terminated after SIGTERM", unit);
                    let _ = signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            warn!("Unit {} did not respond to SIGTERM, sending SIGKILL", unit);
            let _ = signal_group(pid, nix::sys::signal::Signal::SIGKILL);
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            if let Err(e) = child.start_kill() {
                debug!("Kill of unit {} failed: {}", unit, e);
            }
        }

        let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: nix::sys::signal::Signal) -> nix::Result<()> {
    nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pgid as i32), signal)
}

/// Kills a foreground command's whole process group unless disarmed, so that
/// a cancelled or timed-out `run` leaves nothing behind.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            let _ = signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
        }
    }
}

/// Exit code, or 128 + signal number for a signalled process.
#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> Option<i64> {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .map(i64::from)
        .or_else(|| status.signal().map(|sig| 128 + i64::from(sig)))
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> Option<i64> {
    status.code().map(i64::from)
}

#[async_trait]
impl RuntimeProvider for LocalProcessProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn is_available(&self) -> bool {
        Command::new("sh")
            .arg("-c")
            .arg("true")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn host_alias(&self) -> String {
        "127.0.0.1".to_string()
    }

    async fn create_unit(&self, config: &UnitConfig) -> Result<UnitId> {
        if !config.workspace.is_dir() {
            return Err(ProviderError::ContainerError(format!(
                "Workspace {} does not exist",
                config.workspace.display()
            )));
        }

        let mut units = self.units.write().await;
        if units.contains_key(&config.name) {
            return Err(ProviderError::ContainerError(format!(
                "Unit {} already exists",
                config.name
            )));
        }
        units.insert(
            config.name.clone(),
            LocalUnit {
                workdir: config.workspace.clone(),
                child: None,
                pgid: None,
                exit_code: None,
                readers: Vec::new(),
            },
        );

        debug!("Created local unit {} in {}", config.name, config.workspace.display());
        Ok(UnitId(config.name.clone()))
    }

    async fn list_workdir(&self, unit: &UnitId) -> Result<Vec<String>> {
        let workdir = self.workdir(unit).await?;
        let mut entries = tokio::fs::read_dir(&workdir)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn run(
        &self,
        unit: &UnitId,
        command: &str,
        env: &[(String, String)],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let workdir = self.workdir(unit).await?;
        let child = Self::shell(command, &workdir, env)
            .spawn()
            .map_err(|e| ProviderError::SpawnError {
                command: command.to_string(),
                error: e.to_string(),
            })?;

        let guard = GroupGuard { pgid: child.id() };
        info!("Running in unit {}: {}", unit, command);

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                guard.disarm();
                Ok(CommandOutput {
                    exit_code: exit_code_of(output.status),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(ProviderError::InternalError(format!(
                "Failed to wait for command: {}",
                e
            ))),
            Err(_) => {
                warn!("Command in unit {} timed out after {:?}", unit, timeout);
                drop(guard);
                Ok(CommandOutput {
                    timed_out: true,
                    ..CommandOutput::default()
                })
            }
        }
    }

    async fn spawn(&self, unit: &UnitId, command: &str, env: &[(String, String)]) -> Result<()> {
        let workdir = self.workdir(unit).await?;
        let mut child = Self::shell(command, &workdir, env)
            .spawn()
            .map_err(|e| ProviderError::SpawnError {
                command: command.to_string(),
                error: e.to_string(),
            })?;

        info!("Spawned '{}' in unit {} with PID {:?}", command, unit, child.id());
        let readers = self.capture_output(&unit.0, &mut child);

        let mut units = self.units.write().await;
        match units.get_mut(&unit.0) {
            Some(local) => {
                local.pgid = child.id();
                local.child = Some(child);
                local.readers = readers;
                Ok(())
            }
            None => {
                // Removed concurrently; the child is killed on drop.
                Err(ProviderError::UnknownUnit(unit.0.clone()))
            }
        }
    }

    async fn exit_status(&self, unit: &UnitId) -> Result<Option<i64>> {
        let readers = {
            let mut units = self.units.write().await;
            let local = units
                .get_mut(&unit.0)
                .ok_or_else(|| ProviderError::UnknownUnit(unit.0.clone()))?;

            if local.exit_code.is_some() {
                return Ok(local.exit_code);
            }
            let Some(child) = local.child.as_mut() else {
                return Ok(None);
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    local.exit_code = Some(exit_code_of(status).unwrap_or(-1));
                    std::mem::take(&mut local.readers)
                }
                Ok(None) => return Ok(None),
                Err(e) => return Err(ProviderError::InternalError(e.to_string())),
            }
        };

        // Let the readers flush the final lines before anyone reads the log.
        let _ = tokio::time::timeout(LOG_DRAIN_TIMEOUT, futures::future::join_all(readers)).await;

        let units = self.units.read().await;
        Ok(units.get(&unit.0).and_then(|u| u.exit_code))
    }

    async fn logs(&self, unit: &UnitId) -> Result<Vec<String>> {
        Ok(self
            .unit_logs
            .read()
            .await
            .get(&unit.0)
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_unit(&self, unit: &UnitId) -> Result<()> {
        let removed = self.units.write().await.remove(&unit.0);
        let Some(mut local) = removed else {
            debug!("Unit {} already removed", unit);
            return Ok(());
        };

        if let Some(mut child) = local.child.take() {
            self.kill_group(&unit.0, &mut child, local.pgid).await;
        }
        for reader in local.readers.drain(..) {
            reader.abort();
        }
        self.unit_logs.write().await.remove(&unit.0);

        info!("Removed unit {}", unit);
        Ok(())
    }
}
