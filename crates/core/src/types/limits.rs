use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Network Mode
// =============================================================================

/// Network isolation mode for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No network access (default).
    None,
    /// Egress restricted to `allowed_domains`. Requires an egress filter in
    /// the active backend; without one this degrades to `None`, never to
    /// `Unrestricted`.
    Allowlist,
    /// Full outbound network access (dangerous).
    Unrestricted,
}

// =============================================================================
// Resource Limits
// =============================================================================

/// Resource envelope for one sandboxed execution.
///
/// Constructed once per execution request and read-only thereafter. All
/// numeric fields must be strictly positive; `validate` enforces this before
/// any isolation unit is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Hard wall-clock deadline in seconds.
    pub timeout_seconds: f64,
    /// Memory limit in megabytes.
    pub memory_limit_mb: u64,
    /// CPU quota as a fraction of one core (0.5 = half a core).
    pub cpu_quota: f64,
    /// Writable scratch space in megabytes.
    pub disk_quota_mb: u64,
    /// Maximum number of processes inside the isolation unit.
    pub max_processes: u32,
    /// Requested network isolation mode.
    pub network_mode: NetworkMode,
    /// Allowed egress domains; only meaningful when `network_mode` is
    /// `Allowlist`.
    pub allowed_domains: Vec<String>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout_seconds: 30.0,
            memory_limit_mb: 512,
            cpu_quota: 1.0,
            disk_quota_mb: 512,
            max_processes: 64,
            network_mode: NetworkMode::None,
            allowed_domains: Vec::new(),
        }
    }
}

impl ResourceLimits {
    /// Check that every limit is strictly positive.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_seconds <= 0.0 {
            return Err(Error::invalid_request("timeout_seconds must be > 0"));
        }
        if self.memory_limit_mb == 0 {
            return Err(Error::invalid_request("memory_limit_mb must be > 0"));
        }
        if self.cpu_quota <= 0.0 {
            return Err(Error::invalid_request("cpu_quota must be > 0"));
        }
        if self.disk_quota_mb == 0 {
            return Err(Error::invalid_request("disk_quota_mb must be > 0"));
        }
        if self.max_processes == 0 {
            return Err(Error::invalid_request("max_processes must be > 0"));
        }
        Ok(())
    }

    /// Resolve the network mode that the backend will actually enforce.
    ///
    /// `Allowlist` requires a domain-level egress filter. A backend that has
    /// none must fail closed: the effective mode is `None`. An unimplemented
    /// security feature never degrades to `Unrestricted`.
    pub fn effective_network_mode(&self, egress_filtering: bool) -> NetworkMode {
        match self.network_mode {
            NetworkMode::Allowlist if !egress_filtering => {
                tracing::warn!(
                    allowed_domains = ?self.allowed_domains,
                    "allowlist network mode requested but backend has no egress filter; failing closed to 'none'"
                );
                NetworkMode::None
            }
            ref mode => mode.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
