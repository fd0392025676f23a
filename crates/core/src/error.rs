//! Error types for Airlock.

use thiserror::Error;

/// Result type alias using Airlock's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Airlock.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    /// The isolation unit itself could not be created (engine unreachable,
    /// quota exhausted). This is the only retryable class, and only at the
    /// sandbox-creation boundary.
    #[error("Sandbox infrastructure error: {0}")]
    SandboxInfrastructure(String),

    #[error("Execution timed out after {elapsed_seconds:.2}s")]
    ExecutionTimeout { elapsed_seconds: f64 },

    /// Guest code ran and failed deterministically (non-zero exit, guest
    /// exception). Never retried.
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Unsupported sandbox backend: {0}")]
    UnsupportedBackend(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a sandbox infrastructure error.
    pub fn sandbox_infrastructure(msg: impl Into<String>) -> Self {
        Self::SandboxInfrastructure(msg.into())
    }

    /// Create an execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create an unsupported backend error.
    pub fn unsupported_backend(name: impl Into<String>) -> Self {
        Self::UnsupportedBackend(name.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a collaborator may retry the failed operation.
    ///
    /// Only infrastructure failures at the sandbox-creation boundary are
    /// retryable. Validation, timeout, and guest-execution failures are
    /// deterministic and must not be re-submitted unmodified.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SandboxInfrastructure(_))
    }

    /// Stable machine-readable error kind, used by `ErrorInfo`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::SandboxInfrastructure(_) => "sandbox_infrastructure",
            Self::ExecutionTimeout { .. } => "execution_timeout",
            Self::Execution(_) => "execution",
            Self::UnsupportedBackend(_) => "unsupported_backend",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
            Self::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_infrastructure_errors_are_retryable() {
        assert!(Error::sandbox_infrastructure("daemon unreachable").is_retryable());

        assert!(!Error::validation("import os").is_retryable());
        assert!(!Error::execution("exit code 1").is_retryable());
        assert!(!Error::ExecutionTimeout {
            elapsed_seconds: 2.0
        }
        .is_retryable());
        assert!(!Error::unsupported_backend("vm").is_retryable());
        assert!(!Error::internal("oops").is_retryable());
    }

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(Error::validation("x").kind(), "validation");
        assert_eq!(
            Error::sandbox_infrastructure("x").kind(),
            "sandbox_infrastructure"
        );
        assert_eq!(
            Error::ExecutionTimeout {
                elapsed_seconds: 1.0
            }
            .kind(),
            "execution_timeout"
        );
        assert_eq!(Error::execution("x").kind(), "execution");
    }
}
