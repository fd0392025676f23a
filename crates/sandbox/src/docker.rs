//! Docker Engine backend: one ephemeral, resource-capped container per
//! execution.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, WaitContainerOptions,
};
use bollard::models::{HostConfig, Mount, MountTmpfsOptions, MountTypeEnum, ResourcesUlimits};
use bollard::Docker;
use futures::StreamExt;

use airlock_core::{Error, ExecutionResult, NetworkMode, ResourceLimits, Result};

use crate::engine::Sandbox;

/// Working directory inside the container; the only writable path.
const WORKDIR: &str = "/workspace";

/// Standard cgroup CFS period in microseconds.
const CPU_PERIOD_MICROS: i64 = 100_000;

// =============================================================================
// Container Sandbox
// =============================================================================

/// Docker-based sandbox running each execution in a fresh container.
///
/// Containers are created from a fixed trusted image (ships a Python
/// runtime and a non-root `agent` user), started with cgroup-level CPU,
/// memory, and process caps, a read-only root filesystem with a tmpfs
/// scratch workspace, no capabilities, and no network unless the effective
/// network mode allows it. The container is force-removed on every exit
/// path, including deadline expiry and cancellation of the calling task.
pub struct ContainerSandbox {
    docker: Docker,
    image: String,
}

impl ContainerSandbox {
    /// Connect to the local Docker daemon (honors `DOCKER_HOST`).
    pub fn new(image: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            Error::sandbox_infrastructure(format!(
                "failed to connect to Docker daemon: {e}. Is Docker running?"
            ))
        })?;
        Ok(Self {
            docker,
            image: image.into(),
        })
    }

    /// Connect to an explicit Docker socket path.
    pub fn with_socket(socket_path: &str, image: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| {
                Error::sandbox_infrastructure(format!(
                    "failed to connect to Docker socket '{socket_path}': {e}"
                ))
            })?;
        Ok(Self {
            docker,
            image: image.into(),
        })
    }

    /// Create from an existing bollard Docker client (for testing).
    pub fn from_client(docker: Docker, image: impl Into<String>) -> Self {
        Self {
            docker,
            image: image.into(),
        }
    }
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    async fn execute(&self, code: &str, limits: &ResourceLimits) -> Result<ExecutionResult> {
        limits.validate()?;
        let effective_network = limits.effective_network_mode(self.supports_egress_filtering());
        let name = format!("airlock-exec-{}", uuid::Uuid::new_v4());

        let options = CreateContainerOptions {
            name: &name,
            platform: None,
        };

        self.docker
            .create_container(Some(options), container_config(&self.image, code, limits, &effective_network))
            .await
            .map_err(|e| {
                Error::sandbox_infrastructure(format!("failed to create execution container: {e}"))
            })?;

        // From here on the container exists; the guard guarantees removal
        // even if this future is dropped mid-execution.
        let guard = ContainerGuard::new(self.docker.clone(), name.clone());

        self.docker
            .start_container::<String>(&name, None)
            .await
            .map_err(|e| {
                Error::sandbox_infrastructure(format!("failed to start execution container: {e}"))
            })?;

        let started = Instant::now();
        let deadline = Duration::from_secs_f64(limits.timeout_seconds);
        tracing::debug!(container = %name, timeout_seconds = limits.timeout_seconds, "execution container started");

        let mut wait_stream = self
            .docker
            .wait_container(&name, None::<WaitContainerOptions<String>>);
        let waited = tokio::time::timeout(deadline, wait_stream.next()).await;
        let elapsed = started.elapsed().as_secs_f64();

        match waited {
            // Deadline expired before the guest exited. The deadline timer is
            // external to the guest; no in-guest cooperation is assumed.
            Err(_) => {
                tracing::warn!(container = %name, elapsed_seconds = elapsed, "execution deadline expired; killing container");
                let _ = self
                    .docker
                    .kill_container(&name, Some(KillContainerOptions { signal: "SIGKILL" }))
                    .await;
                let (stdout, stderr) = collect_logs(&self.docker, &name).await;
                guard.remove().await;
                Ok(ExecutionResult::timed_out(stdout, stderr, elapsed))
            }
            Ok(Some(Ok(exit))) => {
                let (stdout, stderr) = collect_logs(&self.docker, &name).await;
                guard.remove().await;
                tracing::info!(container = %name, exit_code = exit.status_code, elapsed_seconds = elapsed, "execution completed");
                Ok(ExecutionResult::completed(
                    exit.status_code,
                    stdout,
                    stderr,
                    elapsed,
                ))
            }
            // Engine errors after start are reported as failed results, not
            // retryable infrastructure errors: re-running mid-execution could
            // double-execute guest code with side effects.
            Ok(Some(Err(e))) => {
                let (stdout, stderr) = collect_logs(&self.docker, &name).await;
                guard.remove().await;
                Ok(ExecutionResult::failed(
                    format!("engine error while waiting for container exit: {e}"),
                    stdout,
                    stderr,
                    elapsed,
                ))
            }
            Ok(None) => {
                guard.remove().await;
                Ok(ExecutionResult::failed(
                    "container wait stream ended without a status",
                    "",
                    "",
                    elapsed,
                ))
            }
        }
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

// =============================================================================
// Container Configuration
// =============================================================================

fn container_config(
    image: &str,
    code: &str,
    limits: &ResourceLimits,
    effective_network: &NetworkMode,
) -> Config<String> {
    Config {
        image: Some(image.to_string()),
        cmd: Some(vec![
            "python3".to_string(),
            "-u".to_string(),
            "-c".to_string(),
            code.to_string(),
        ]),
        working_dir: Some(WORKDIR.to_string()),
        user: Some("agent".to_string()), // non-root
        host_config: Some(host_config(limits, effective_network)),
        labels: Some(HashMap::from([(
            "managed-by".to_string(),
            "airlock".to_string(),
        )])),
        ..Default::default()
    }
}

fn host_config(limits: &ResourceLimits, effective_network: &NetworkMode) -> HostConfig {
    HostConfig {
        memory: Some((limits.memory_limit_mb * 1024 * 1024) as i64),
        // Same value as `memory`: no swap headroom beyond the limit.
        memory_swap: Some((limits.memory_limit_mb * 1024 * 1024) as i64),
        cpu_period: Some(CPU_PERIOD_MICROS),
        cpu_quota: Some((limits.cpu_quota * CPU_PERIOD_MICROS as f64) as i64),
        pids_limit: Some(limits.max_processes as i64),
        network_mode: Some(docker_network_mode(effective_network).to_string()),
        // tmpfs scratch space; the rest of the filesystem is read-only.
        mounts: Some(vec![Mount {
            target: Some(WORKDIR.to_string()),
            typ: Some(MountTypeEnum::TMPFS),
            tmpfs_options: Some(MountTmpfsOptions {
                size_bytes: Some((limits.disk_quota_mb * 1024 * 1024) as i64),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        readonly_rootfs: Some(true),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        ulimits: Some(vec![ResourcesUlimits {
            name: Some("nofile".to_string()),
            soft: Some(1024),
            hard: Some(2048),
        }]),
        ..Default::default()
    }
}

// `Allowlist` is resolved to an effective mode before this point; an
// unresolved value still maps to the restrictive option.
fn docker_network_mode(mode: &NetworkMode) -> &'static str {
    match mode {
        NetworkMode::None | NetworkMode::Allowlist => "none",
        NetworkMode::Unrestricted => "bridge",
    }
}

// =============================================================================
// Cleanup Guard
// =============================================================================

/// Scoped ownership of one execution container.
///
/// Normal paths call `remove` explicitly; if the owning future is dropped
/// first (task cancellation), `Drop` spawns the forced removal so the
/// container never outlives its execution.
struct ContainerGuard {
    docker: Docker,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, name: String) -> Self {
        Self {
            docker,
            name,
            armed: true,
        }
    }

    async fn remove(mut self) {
        self.armed = false;
        remove_container(&self.docker, &self.name).await;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.armed {
            let docker = self.docker.clone();
            let name = self.name.clone();
            tokio::spawn(async move {
                tracing::warn!(container = %name, "execution cancelled; removing container");
                let _ = docker
                    .kill_container(&name, Some(KillContainerOptions { signal: "SIGKILL" }))
                    .await;
                remove_container(&docker, &name).await;
            });
        }
    }
}

async fn remove_container(docker: &Docker, name: &str) {
    if let Err(e) = docker
        .remove_container(
            name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
    {
        tracing::warn!(container = %name, error = %e, "failed to remove execution container");
    }
}

async fn collect_logs(docker: &Docker, name: &str) -> (String, String) {
    let options = LogsOptions::<String> {
        stdout: true,
        stderr: true,
        ..Default::default()
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut stream = docker.logs(name, Some(options));
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(LogOutput::StdOut { message }) => {
                stdout.push_str(&String::from_utf8_lossy(&message));
            }
            Ok(LogOutput::StdErr { message }) => {
                stderr.push_str(&String::from_utf8_lossy(&message));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "log stream ended early");
                break;
            }
        }
    }
    (stdout, stderr)
}

// =============================================================================
// Tests
// =============================================================================
