use serde::{Deserialize, Serialize};

// =============================================================================
// Execution Status
// =============================================================================

/// Terminal state of one sandboxed execution.
///
/// Timeouts and infrastructure failures are modeled as states rather than
/// control-flow exceptions: `InfraFailed` corresponds to the error-return
/// branch of `Sandbox::execute`, the other two project out of
/// `ExecutionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The guest ran to completion (successfully or not).
    Completed,
    /// The wall-clock deadline expired and the isolation unit was killed.
    TimedOut,
    /// The isolation unit could not be created.
    InfraFailed,
}

// =============================================================================
// Execution Result
// =============================================================================

/// Outcome of one sandboxed execution.
///
/// Produced exactly once per `Sandbox::execute` call, then immutable. The
/// constructors enforce the core invariant: `success` is true iff the guest
/// exited with code 0 and the deadline did not expire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the execution succeeded (`exit_code == 0` and not timed out).
    pub success: bool,
    /// Captured standard output (possibly partial on timeout).
    pub stdout: String,
    /// Captured standard error (possibly partial on timeout).
    pub stderr: String,
    /// Guest exit code; `None` when the guest never reached a terminal exit
    /// (timeout, orchestration failure).
    pub exit_code: Option<i64>,
    /// Observed wall-clock duration in seconds.
    pub execution_time_seconds: f64,
    /// Whether the hard deadline expired.
    pub timed_out: bool,
    /// Peak memory usage in megabytes, when the backend reports it.
    pub memory_used_mb: Option<f64>,
    /// Orchestration-level error detail (log retrieval failed, status
    /// polling failed), when the guest outcome could not be fully observed.
    pub error_message: Option<String>,
}

impl ExecutionResult {
    /// Result for a guest that ran to a terminal exit.
    pub fn completed(
        exit_code: i64,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        execution_time_seconds: f64,
    ) -> Self {
        Self {
            success: exit_code == 0,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            execution_time_seconds,
            timed_out: false,
            memory_used_mb: None,
            error_message: None,
        }
    }

    /// Result for an execution that hit the wall-clock deadline. Never
    /// successful, regardless of any partial output captured.
    pub fn timed_out(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        execution_time_seconds: f64,
    ) -> Self {
        Self {
            success: false,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: None,
            execution_time_seconds,
            timed_out: true,
            memory_used_mb: None,
            error_message: Some(format!(
                "execution exceeded the wall-clock deadline after {:.2}s",
                execution_time_seconds
            )),
        }
    }

    /// Result for an execution whose guest outcome could not be observed
    /// (wait stream broke, logs unavailable). Never successful, never
    /// retryable.
    pub fn failed(
        error_message: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        execution_time_seconds: f64,
    ) -> Self {
        Self {
            success: false,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: None,
            execution_time_seconds,
            timed_out: false,
            memory_used_mb: None,
            error_message: Some(error_message.into()),
        }
    }

    /// Attach a memory-usage observation.
    pub fn with_memory_used(mut self, memory_used_mb: f64) -> Self {
        self.memory_used_mb = Some(memory_used_mb);
        self
    }

    /// Terminal state of this result.
    pub fn status(&self) -> ExecutionStatus {
        if self.timed_out {
            ExecutionStatus::TimedOut
        } else {
            ExecutionStatus::Completed
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
