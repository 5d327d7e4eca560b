/// Container Runtime - Docker Primitives
///
/// **Responsibility:**
/// Thin async wrapper over the Docker daemon: image, container and exec
/// primitives with combined-stream attachment.
///
/// **Boundary:**
/// - Knows HOW to talk to Docker
/// - Does NOT know about languages, fixtures or verdicts
/// - Session lifecycle and cleanup rules live in `session.rs`
///
/// One `DockerEngine` is created at process start and shared by every check.
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::{self, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::error::RuntimeError;

/// Combined stdout/stderr frames of one exec
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<LogOutput, RuntimeError>> + Send>>;

/// A dispatched exec whose output has not been read yet
pub struct ExecHandle {
    pub exec_id: String,
    pub output: OutputStream,
}

/// Everything needed to create one sandbox container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub working_dir: String,
    /// Staged artifact as the runtime resolves it
    pub artifact_host_path: PathBuf,
    /// Where the artifact appears inside the container (read-only)
    pub artifact_container_path: String,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
    /// Upper bound on container lifetime if teardown never happens
    pub keep_alive_secs: u64,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    pub fn bind(&self) -> String {
        format!(
            "{}:{}:ro",
            self.artifact_host_path.display(),
            self.artifact_container_path
        )
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make sure `image` is present locally, pulling it on a cache miss
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a container and return its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Dispatch `cmd` inside a running container with stdout and stderr attached
    async fn start_exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecHandle, RuntimeError>;

    /// Exit code of a finished exec, `None` while it is still running
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError>;

    async fn stop_container(&self, container_id: &str, grace_secs: i64) -> Result<(), RuntimeError>;

    /// Force-remove a container
    async fn remove_container(&self, container_id: &str) -> Result<(), RuntimeError>;
}

/// Docker-backed container runtime
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon and verify it answers
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        docker
            .ping()
            .await
            .context("Docker daemon did not answer ping")?;

        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let config = Config {
            image: Some(spec.image.clone()),
            // Idle until execs arrive; exits on its own if teardown is ever lost
            entrypoint: Some(vec![]),
            cmd: Some(vec!["sleep".to_string(), spec.keep_alive_secs.to_string()]),
            working_dir: Some(spec.working_dir.clone()),
            network_disabled: Some(true),
            labels: Some(spec.labels.clone()),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![spec.bind()]),
                memory: Some(spec.memory_bytes),
                memory_swap: Some(spec.memory_bytes),
                nano_cpus: Some(spec.nano_cpus),
                pids_limit: Some(spec.pids_limit),
                network_mode: Some("none".to_string()),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self.docker.create_container(Some(options), config).await?;
        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Docker create warning");
        }
        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
    }

    async fn start_exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecHandle, RuntimeError> {
        let exec_config = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self.docker.create_exec(container_id, exec_config).await?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let output: OutputStream = match self.docker.start_exec(&exec.id, Some(start_config)).await? {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => stream::empty().boxed(),
        };

        Ok(ExecHandle {
            exec_id: exec.id,
            output,
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        Ok(self.docker.inspect_exec(exec_id).await?.exit_code)
    }

    async fn stop_container(&self, container_id: &str, grace_secs: i64) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(container_id, Some(StopContainerOptions { t: grace_secs }))
            .await
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(container_id, Some(options)).await
    }
}
