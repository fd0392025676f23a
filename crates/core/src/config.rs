use std::str::FromStr;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::ResourceLimits;

// =============================================================================
// Backend Selection
// =============================================================================

/// Isolation backend, chosen once at configuration-load time.
///
/// Callers interact with the backend only through the `Sandbox` trait and
/// never branch on this value after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxBackend {
    /// One ephemeral Docker container per execution.
    ContainerEngine,
    /// One ephemeral Kubernetes Job per execution.
    ClusterJob,
}

impl FromStr for SandboxBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "container-engine" => Ok(Self::ContainerEngine),
            "cluster-job" => Ok(Self::ClusterJob),
            other => Err(Error::unsupported_backend(other)),
        }
    }
}

// =============================================================================
// Execution Configuration
// =============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct DockerConfig {
    /// Docker Engine socket path; `None` uses the local defaults
    /// (`DOCKER_HOST` or `/var/run/docker.sock`).
    pub socket_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KubernetesConfig {
    /// Namespace that receives execution Jobs. Expected to carry a
    /// default-deny egress NetworkPolicy selecting isolated pods.
    pub namespace: String,
    /// `ttlSecondsAfterFinished` applied to every Job, so the cluster
    /// reclaims finished Jobs even if the orchestrator dies before its own
    /// delete call.
    pub job_ttl_seconds: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    /// Maximum concurrent tool invocations per batch.
    pub max_parallelism: usize,
    /// Per-task timeout in seconds; `None` disables the per-task deadline.
    pub task_timeout_seconds: Option<f64>,
}

/// Read-only configuration for the execution subsystem.
///
/// Loaded once at startup by the embedding application and threaded
/// explicitly through every call; there are no process-wide mutable
/// defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// Which isolation backend runs untrusted code.
    pub backend: SandboxBackend,
    /// Trusted execution image (ships a Python runtime and a non-root
    /// `agent` user).
    pub image: String,
    pub docker: DockerConfig,
    pub kubernetes: KubernetesConfig,
    /// Default resource envelope applied to executions.
    pub limits: ResourceLimits,
    /// Root module names guest code may import.
    pub allowed_imports: Vec<String>,
    pub executor: ExecutorConfig,
}

impl ExecutionConfig {
    /// Load configuration from layered files plus environment overrides.
    ///
    /// `AIRLOCK__EXECUTOR__MAX_PARALLELISM=8` maps to
    /// `executor.max_parallelism`, mirroring the deployment convention of
    /// the wider platform.
    pub fn load() -> Result<Self> {
        let env = std::env::var("AIRLOCK_ENV").unwrap_or_else(|_| "development".into());

        let settings = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("AIRLOCK").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::ContainerEngine,
            image: "airlock-runner:latest".into(),
            docker: DockerConfig { socket_path: None },
            kubernetes: KubernetesConfig {
                namespace: "airlock-exec".into(),
                job_ttl_seconds: 300,
            },
            limits: ResourceLimits::default(),
            allowed_imports: vec![
                "json".into(),
                "math".into(),
                "re".into(),
                "datetime".into(),
                "collections".into(),
                "itertools".into(),
                "functools".into(),
                "statistics".into(),
                "random".into(),
            ],
            executor: ExecutorConfig {
                max_parallelism: 8,
                task_timeout_seconds: Some(60.0),
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!(
            "container-engine".parse::<SandboxBackend>().unwrap(),
            SandboxBackend::ContainerEngine
        );
        assert_eq!(
            "cluster-job".parse::<SandboxBackend>().unwrap(),
            SandboxBackend::ClusterJob
        );
    }

    #[test]
    fn test_unknown_backend_is_fatal() {
        let err = "firecracker".parse::<SandboxBackend>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedBackend(_)));
        assert!(err.to_string().contains("firecracker"));
    }

    #[test]
    fn test_backend_deserializes_kebab_case() {
        let backend: SandboxBackend = serde_json::from_str("\"cluster-job\"").unwrap();
        assert_eq!(backend, SandboxBackend::ClusterJob);
    }

    #[test]
    fn test_default_config_is_coherent() {
        let config = ExecutionConfig::default();
        assert_eq!(config.backend, SandboxBackend::ContainerEngine);
        assert!(config.executor.max_parallelism > 0);
        assert!(config.limits.validate().is_ok());
        assert!(config.allowed_imports.contains(&"json".to_string()));
        assert!(!config.allowed_imports.contains(&"os".to_string()));
    }
}
