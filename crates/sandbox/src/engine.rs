//! The `Sandbox` trait, backend factory, and in-memory test double.

use std::sync::Arc;

use async_trait::async_trait;

use airlock_core::{
    ExecutionConfig, ExecutionResult, ResourceLimits, Result, SandboxBackend,
};

use crate::docker::ContainerSandbox;
use crate::kubernetes::ClusterJobSandbox;

// =============================================================================
// Sandbox Trait
// =============================================================================

/// Capability interface over interchangeable isolation backends.
///
/// `execute` runs one piece of untrusted code inside a fresh isolation
/// unit and never returns `Err` for guest-code failures; those become
/// `success = false` results. The only error it raises is
/// `Error::SandboxInfrastructure`, for failures to create the isolation
/// unit itself, which a collaborator may retry with backoff.
///
/// Every execution moves through
/// `CREATED → RUNNING → {COMPLETED | TIMED_OUT | INFRA_FAILED} → CLEANED_UP`;
/// the cleanup edge is reached on every path, including cancellation of the
/// calling task.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute `code` under `limits` in a fresh isolation unit.
    async fn execute(&self, code: &str, limits: &ResourceLimits) -> Result<ExecutionResult>;

    /// Whether this backend enforces a domain-level egress filter.
    ///
    /// Backends without one resolve `NetworkMode::Allowlist` to
    /// `NetworkMode::None` at execution time: fail closed, never open.
    fn supports_egress_filtering(&self) -> bool {
        false
    }

    /// Check whether the backend is reachable (engine daemon, API server).
    async fn is_available(&self) -> bool;
}

// =============================================================================
// Backend Factory
// =============================================================================

/// Build the configured sandbox backend.
///
/// Backend selection happens exactly once, at configuration-load time;
/// callers hold the result only as `Arc<dyn Sandbox>` and never branch on
/// backend identity afterwards.
pub async fn build_sandbox(config: &ExecutionConfig) -> Result<Arc<dyn Sandbox>> {
    match config.backend {
        SandboxBackend::ContainerEngine => {
            let sandbox = match &config.docker.socket_path {
                Some(path) => ContainerSandbox::with_socket(path, &config.image)?,
                None => ContainerSandbox::new(&config.image)?,
            };
            Ok(Arc::new(sandbox))
        }
        SandboxBackend::ClusterJob => {
            let sandbox = ClusterJobSandbox::connect(
                &config.image,
                &config.kubernetes.namespace,
                config.kubernetes.job_ttl_seconds,
            )
            .await?;
            Ok(Arc::new(sandbox))
        }
    }
}

// =============================================================================
// Mock Sandbox (for testing without Docker or a cluster)
// =============================================================================

/// In-memory mock sandbox for unit testing.
///
/// Returns scripted results in order and records every piece of code it
/// was asked to execute, so tests can assert that rejected code never
/// reached the sandbox.
#[derive(Default)]
pub struct MockSandbox {
    results: tokio::sync::Mutex<Vec<ExecutionResult>>,
    executed: tokio::sync::Mutex<Vec<String>>,
}

impl MockSandbox {
    /// Create a mock sandbox with predefined results.
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: tokio::sync::Mutex::new(results),
            executed: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Code snippets executed so far, in order.
    pub async fn executed_codes(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }

    /// Number of `execute` calls observed.
    pub async fn execution_count(&self) -> usize {
        self.executed.lock().await.len()
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn execute(&self, code: &str, limits: &ResourceLimits) -> Result<ExecutionResult> {
        limits.validate()?;
        self.executed.lock().await.push(code.to_string());

        let mut results = self.results.lock().await;
        if results.is_empty() {
            Ok(ExecutionResult::completed(0, "[mock] executed", "", 0.0))
        } else {
            Ok(results.remove(0))
        }
    }

    async fn is_available(&self) -> bool {
        true
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use airlock_core::ExecutionStatus;

    #[tokio::test]
    async fn test_mock_sandbox_returns_scripted_results() {
        let mock = MockSandbox::new(vec![
            ExecutionResult::completed(0, "4\n", "", 0.1),
            ExecutionResult::timed_out("partial", "", 2.0),
        ]);
        let limits = ResourceLimits::default();

        let first = mock.execute("print(2 + 2)", &limits).await.unwrap();
        assert!(first.success);
        assert_eq!(first.stdout, "4\n");

        let second = mock.execute("while True: pass", &limits).await.unwrap();
        assert!(second.timed_out);
        assert_eq!(second.status(), ExecutionStatus::TimedOut);

        assert_eq!(mock.execution_count().await, 2);
        assert_eq!(
            mock.executed_codes().await,
            vec!["print(2 + 2)", "while True: pass"]
        );
    }

    #[tokio::test]
    async fn test_mock_sandbox_rejects_invalid_limits() {
        let mock = MockSandbox::default();
        let limits = ResourceLimits {
            timeout_seconds: -1.0,
            ..Default::default()
        };

        assert!(mock.execute("print(1)", &limits).await.is_err());
        assert_eq!(mock.execution_count().await, 0);
    }

    #[tokio::test]
    async fn test_sandbox_is_object_safe() {
        let sandbox: Arc<dyn Sandbox> = Arc::new(MockSandbox::default());
        assert!(sandbox.is_available().await);
        assert!(!sandbox.supports_egress_filtering());
    }
}
