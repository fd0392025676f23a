use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

// =============================================================================
// Tool Invocation
// =============================================================================

/// One requested tool call within a batch.
///
/// `invocation_id` is caller-assigned, unique within one batch, and used
/// only for correlating results, never for ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Caller-assigned correlation ID.
    pub invocation_id: String,
    /// Name of the tool to dispatch.
    pub tool_name: String,
    /// Tool arguments as a JSON object.
    pub arguments: Value,
}

impl ToolInvocation {
    /// Create a new invocation.
    pub fn new(
        invocation_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

// =============================================================================
// Error Info
// =============================================================================

/// Machine-readable error attached to a failed `ToolResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error kind (`validation`, `task_timeout`, ...).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error info.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

// =============================================================================
// Tool Result
// =============================================================================

/// Outcome of one tool invocation.
///
/// Exactly one of `result` / `error` is set; the constructors are the only
/// way to build one. `duration_ms` is always populated, including on
/// timeout and panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlation ID copied from the invocation.
    pub invocation_id: String,
    /// Tool name copied from the invocation.
    pub tool_name: String,
    /// Tool output on success.
    pub result: Option<Value>,
    /// Error detail on failure.
    pub error: Option<ErrorInfo>,
    /// Wall-clock duration from dispatch to resolution, in milliseconds.
    pub duration_ms: f64,
}

impl ToolResult {
    /// Create a successful result.
    pub fn ok(
        invocation_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: Value,
        duration_ms: f64,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool_name: tool_name.into(),
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    /// Create a failed result.
    pub fn err(
        invocation_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: ErrorInfo,
        duration_ms: f64,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool_name: tool_name.into(),
            result: None,
            error: Some(error),
            duration_ms,
        }
    }

    /// Whether the invocation produced a value.
    pub fn is_ok(&self) -> bool {
        self.result.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================
