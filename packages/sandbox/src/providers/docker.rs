// ABOUTME: Docker provider: each unit is a resource-capped container holding a copy of the workspace
// ABOUTME: Uses bollard for container lifecycle, exec, tar upload and image pulls

use super::{
    log_buffer, CommandOutput, ProviderError, Result, RuntimeProvider, UnitConfig, UnitId,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
        UploadToContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    Docker,
};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Directory the workspace is copied to inside every container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Keeps the container alive so commands can be exec'd into it.
const KEEPALIVE_CMD: [&str; 3] = ["tail", "-f", "/dev/null"];

struct DockerUnit {
    container_id: String,
    exec_id: Option<String>,
    reader: Option<JoinHandle<()>>,
}

pub struct DockerProvider {
    client: Docker,
    label_prefix: String,
    /// Cache of successfully pulled images to avoid redundant pulls
    image_cache: Arc<RwLock<HashMap<String, chrono::DateTime<chrono::Utc>>>>,
    pull_timeout: Duration,
    units: Arc<RwLock<HashMap<String, DockerUnit>>>,
    unit_logs: Arc<RwLock<HashMap<String, VecDeque<String>>>>,
}

impl DockerProvider {
    /// Create a new Docker provider with default pull timeout (10 minutes)
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(Duration::from_secs(600))
    }

    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(Self::with_client_and_timeout(client, timeout))
    }

    pub fn with_client_and_timeout(client: Docker, timeout: Duration) -> Self {
        Self {
            client,
            label_prefix: "labrun.unit".to_string(),
            image_cache: Arc::new(RwLock::new(HashMap::new())),
            pull_timeout: timeout,
            units: Arc::new(RwLock::new(HashMap::new())),
            unit_logs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Convert a unit config to a bollard container config
    fn to_bollard_config(&self, config: &UnitConfig) -> Config<String> {
        let labels = HashMap::from([
            (format!("{}.managed", self.label_prefix), "true".to_string()),
            (format!("{}.name", self.label_prefix), config.name.clone()),
        ]);

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        if let Some(port) = config.port {
            let container_port = format!("{}/tcp", port);
            exposed_ports.insert(container_port.clone(), HashMap::new());
            port_bindings.insert(
                container_port,
                Some(vec![bollard::models::PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.to_string()),
                }]),
            );
        }

        let host_config = bollard::models::HostConfig {
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            memory: Some((config.memory_mb * 1024 * 1024) as i64),
            nano_cpus: Some((config.cpu_cores as f64 * 1_000_000_000.0) as i64),
            pids_limit: Some(512),
            // Package managers need the default capability set; batch code does not.
            cap_drop: if config.network {
                None
            } else {
                Some(vec!["ALL".to_string()])
            },
            ..Default::default()
        };

        Config {
            image: Some(config.image.clone()),
            cmd: Some(KEEPALIVE_CMD.iter().map(|s| s.to_string()).collect()),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            labels: Some(labels),
            network_disabled: Some(!config.network),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn container_id(&self, unit: &UnitId) -> Result<String> {
        self.units
            .read()
            .await
            .get(&unit.0)
            .map(|u| u.container_id.clone())
            .ok_or_else(|| ProviderError::UnknownUnit(unit.0.clone()))
    }

    fn exec_options(command: &str, env: &[(String, String)]) -> CreateExecOptions<String> {
        CreateExecOptions {
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            env: Some(env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        }
    }

    /// Run a command inside the container and collect its output.
    async fn exec_collect(
        &self,
        container_id: &str,
        command: &str,
        env: &[(String, String)],
    ) -> Result<CommandOutput> {
        let exec = self
            .client
            .create_exec(container_id, Self::exec_options(command, env))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(LogOutput::Console { message }) => stdout.extend_from_slice(&message),
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(ProviderError::ContainerError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let exec_inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        Ok(CommandOutput {
            exit_code: exec_inspect.exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out: false,
        })
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_cache.read().await.contains_key(image) {
            debug!("Image {} found in cache, skipping pull", image);
            return Ok(());
        }
        if !self.image_exists(image).await? {
            self.pull_image(image).await?;
        }
        self.image_cache
            .write()
            .await
            .insert(image.to_string(), chrono::Utc::now());
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            let mut last_status = String::new();
            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(status) = &info.status {
                            if status != &last_status {
                                debug!("Pull status: {}", status);
                                last_status = status.clone();
                            }
                        }
                        if let Some(error) = info.error {
                            return Err(ProviderError::ImageError(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(ProviderError::ImageError(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ProviderError::ImageError(e.to_string())),
        }
    }

    async fn force_remove(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self
            .client
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already gone", container_id);
                Ok(())
            }
            Err(e) => Err(ProviderError::ContainerError(e.to_string())),
        }
    }

    async fn create_and_populate(&self, config: &UnitConfig) -> Result<String> {
        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };
        let container = self
            .client
            .create_container(Some(options), self.to_bollard_config(config))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let populate = async {
            let tar_data = create_tar_archive(&config.workspace)
                .map_err(|e| ProviderError::InternalError(e.to_string()))?;
            let options = UploadToContainerOptions {
                path: "/".to_string(),
                ..Default::default()
            };
            self.client
                .upload_to_container(&container.id, Some(options), tar_data.into())
                .await
                .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

            self.client
                .start_container(&container.id, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| ProviderError::ContainerError(e.to_string()))
        };

        if let Err(e) = populate.await {
            error!("Failed to prepare container {}: {}", container.id, e);
            if let Err(cleanup) = self.force_remove(&container.id).await {
                warn!("Failed to remove container {}: {}", container.id, cleanup);
            }
            return Err(e);
        }

        Ok(container.id)
    }
}

#[async_trait]
impl RuntimeProvider for DockerProvider {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        match self.client.ping().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Docker not available: {}", e);
                false
            }
        }
    }

    /// From inside a container the host's published ports are reached through
    /// `host.docker.internal`; from the host itself, through loopback.
    fn host_alias(&self) -> String {
        if Path::new("/.dockerenv").exists() {
            "host.docker.internal".to_string()
        } else {
            "127.0.0.1".to_string()
        }
    }

    async fn create_unit(&self, config: &UnitConfig) -> Result<UnitId> {
        info!("Creating container: {}", config.name);
        self.ensure_image(&config.image).await?;

        let container_id = self.create_and_populate(config).await?;
        debug!("Created container {} for unit {}", container_id, config.name);

        self.units.write().await.insert(
            config.name.clone(),
            DockerUnit {
                container_id,
                exec_id: None,
                reader: None,
            },
        );
        Ok(UnitId(config.name.clone()))
    }

    async fn list_workdir(&self, unit: &UnitId) -> Result<Vec<String>> {
        let container_id = self.container_id(unit).await?;
        let output = self
            .exec_collect(&container_id, &format!("ls -A {}", CONTAINER_WORKDIR), &[])
            .await?;
        if output.exit_code != Some(0) {
            return Err(ProviderError::ContainerError(format!(
                "Listing {} failed: {}",
                CONTAINER_WORKDIR,
                output.stderr.trim()
            )));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn run(
        &self,
        unit: &UnitId,
        command: &str,
        env: &[(String, String)],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let container_id = self.container_id(unit).await?;
        info!("Executing in container {}: {}", container_id, command);

        match tokio::time::timeout(timeout, self.exec_collect(&container_id, command, env)).await
        {
            Ok(result) => result,
            Err(_) => {
                // The exec dies with the container when the unit is removed.
                warn!("Command in unit {} timed out after {:?}", unit, timeout);
                Ok(CommandOutput {
                    timed_out: true,
                    ..CommandOutput::default()
                })
            }
        }
    }

    async fn spawn(&self, unit: &UnitId, command: &str, env: &[(String, String)]) -> Result<()> {
        let container_id = self.container_id(unit).await?;

        let exec = self
            .client
            .create_exec(&container_id, Self::exec_options(command, env))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let StartExecResults::Attached { mut output, .. } = start_result else {
            return Err(ProviderError::ContainerError(
                "Exec was detached unexpectedly".to_string(),
            ));
        };

        info!("Spawned '{}' in container {}", command, container_id);

        let logs = self.unit_logs.clone();
        let unit_name = unit.0.clone();
        let reader = tokio::spawn(async move {
            let mut pending = String::new();
            while let Some(msg) = output.next().await {
                let message = match msg {
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::StdErr { message })
                    | Ok(LogOutput::Console { message }) => message,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Output stream of unit {} ended: {}", unit_name, e);
                        break;
                    }
                };
                let lines = split_lines(&mut pending, &message);
                if !lines.is_empty() {
                    let mut logs = logs.write().await;
                    let buffer = logs.entry(unit_name.clone()).or_insert_with(VecDeque::new);
                    for line in lines {
                        log_buffer::push(buffer, line);
                    }
                }
            }
            if !pending.is_empty() {
                let mut logs = logs.write().await;
                let buffer = logs.entry(unit_name.clone()).or_insert_with(VecDeque::new);
                log_buffer::push(buffer, std::mem::take(&mut pending));
            }
        });

        let mut units = self.units.write().await;
        match units.get_mut(&unit.0) {
            Some(docker_unit) => {
                docker_unit.exec_id = Some(exec.id);
                docker_unit.reader = Some(reader);
                Ok(())
            }
            None => {
                reader.abort();
                Err(ProviderError::UnknownUnit(unit.0.clone()))
            }
        }
    }

    async fn exit_status(&self, unit: &UnitId) -> Result<Option<i64>> {
        let exec_id = {
            let units = self.units.read().await;
            let docker_unit = units
                .get(&unit.0)
                .ok_or_else(|| ProviderError::UnknownUnit(unit.0.clone()))?;
            match &docker_unit.exec_id {
                Some(id) => id.clone(),
                None => return Ok(None),
            }
        };

        let inspect = self
            .client
            .inspect_exec(&exec_id)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        if inspect.running.unwrap_or(false) {
            return Ok(None);
        }

        let reader = self
            .units
            .write()
            .await
            .get_mut(&unit.0)
            .and_then(|u| u.reader.take());
        if let Some(reader) = reader {
            let _ = tokio::time::timeout(Duration::from_millis(500), reader).await;
        }

        Ok(Some(inspect.exit_code.unwrap_or(-1)))
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
        let Some(docker_unit) = removed else {
            debug!("Unit {} already removed", unit);
            return Ok(());
        };

        if let Some(reader) = docker_unit.reader {
            reader.abort();
        }
        self.unit_logs.write().await.remove(&unit.0);

        info!("Removing container: {}", docker_unit.container_id);
        self.force_remove(&docker_unit.container_id).await
    }
}

/// Append `chunk` to `pending` and return every completed line.
fn split_lines(pending: &mut String, chunk: &[u8]) -> Vec<String> {
    pending.push_str(&String::from_utf8_lossy(chunk));
    let mut lines = Vec::new();
    while let Some(pos) = pending.find('\n') {
        let line: String = pending.drain(..=pos).collect();
        lines.push(line.trim_end_matches(['\r', '\n']).to_string());
    }
    lines
}

/// Tar the workspace under a top-level `workspace/` directory, ready to be
/// unpacked at the container root.
fn create_tar_archive(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut archive = tar::Builder::new(Vec::new());
    archive.append_dir_all(CONTAINER_WORKDIR.trim_start_matches('/'), path)?;
    archive.into_inner()
}
