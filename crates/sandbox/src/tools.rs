//! Tool-layer composition: validate, then execute.
//!
//! `CodeExecutionTool` is the enforcement point for the validate-before-
//! execute contract: code that fails static validation is rejected with
//! `Error::Validation` and never reaches `Sandbox::execute`.

use std::sync::Arc;

use serde_json::Value;

use airlock_core::{Error, ExecutionConfig, ExecutionResult, ResourceLimits, Result};
use airlock_validator::CodeValidator;

use crate::engine::Sandbox;

// =============================================================================
// Code Execution Tool
// =============================================================================

/// Runs untrusted guest code through the validator and the configured
/// sandbox backend.
pub struct CodeExecutionTool {
    validator: CodeValidator,
    sandbox: Arc<dyn Sandbox>,
    limits: ResourceLimits,
}

impl CodeExecutionTool {
    /// Create a new code execution tool.
    pub fn new(validator: CodeValidator, sandbox: Arc<dyn Sandbox>, limits: ResourceLimits) -> Self {
        Self {
            validator,
            sandbox,
            limits,
        }
    }

    /// Build from the subsystem configuration and an already-constructed
    /// backend.
    pub fn from_config(config: &ExecutionConfig, sandbox: Arc<dyn Sandbox>) -> Self {
        Self::new(
            CodeValidator::new(config.allowed_imports.iter().cloned().collect()),
            sandbox,
            config.limits.clone(),
        )
    }

    /// Validate `code` and, only if it passes, execute it in the sandbox.
    pub async fn run(&self, code: &str) -> Result<ExecutionResult> {
        let verdict = self.validator.validate(code);
        if !verdict.is_valid {
            tracing::info!(errors = ?verdict.errors, "rejecting code before execution");
            return Err(Error::validation(verdict.errors.join("; ")));
        }
        for warning in &verdict.warnings {
            tracing::warn!(%warning, "validator warning");
        }

        let result = self.sandbox.execute(code, &self.limits).await?;
        tracing::info!(
            status = ?result.status(),
            exit_code = ?result.exit_code,
            elapsed_seconds = result.execution_time_seconds,
            "sandboxed execution finished"
        );
        Ok(result)
    }

    /// JSON entry point matching the executor's `tool_fn` shape.
    ///
    /// Expects `{"code": "..."}`. A deadline expiry surfaces as
    /// `Error::ExecutionTimeout`; a guest that ran to a non-zero exit stays
    /// a value, so the caller can read its stderr.
    pub async fn execute(&self, args: Value) -> Result<Value> {
        let code = args
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::invalid_request("code is required"))?;

        let result = self.run(code).await?;
        if result.timed_out {
            return Err(Error::ExecutionTimeout {
                elapsed_seconds: result.execution_time_seconds,
            });
        }

        Ok(serde_json::to_value(result)?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockSandbox;
    use serde_json::json;

    fn tool_with(results: Vec<ExecutionResult>) -> (CodeExecutionTool, Arc<MockSandbox>) {
        let sandbox = Arc::new(MockSandbox::new(results));
        let validator = CodeValidator::new(
            ["json", "math"].into_iter().map(String::from).collect(),
        );
        let tool = CodeExecutionTool::new(validator, sandbox.clone(), ResourceLimits::default());
        (tool, sandbox)
    }

    #[tokio::test]
    async fn test_valid_code_executes() {
        let (tool, sandbox) = tool_with(vec![ExecutionResult::completed(0, "4\n", "", 0.1)]);

        let result = tool.run("print(2 + 2)").await.unwrap();
        assert!(result.success);
        assert!(result.stdout.contains('4'));
        assert!(!result.timed_out);
        assert_eq!(sandbox.execution_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_code_never_reaches_the_sandbox() {
        let (tool, sandbox) = tool_with(vec![]);

        let err = tool.run("import os\nos.system('echo hi')").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("'os'"));
        assert_eq!(sandbox.execution_count().await, 0);
    }

    #[tokio::test]
    async fn test_syntax_error_never_reaches_the_sandbox() {
        let (tool, sandbox) = tool_with(vec![]);

        let err = tool.run("def broken(:").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(sandbox.execution_count().await, 0);
    }

    #[tokio::test]
    async fn test_warnings_do_not_block_execution() {
        let (tool, sandbox) = tool_with(vec![ExecutionResult::timed_out("", "", 2.0)]);

        // `while True: pass` is a warning, not an error; the sandbox's
        // deadline is what terminates it.
        let result = tool.run("while True: pass").await.unwrap();
        assert!(result.timed_out);
        assert!(!result.success);
        assert_eq!(sandbox.execution_count().await, 1);
    }

    #[tokio::test]
    async fn test_json_surface_maps_timeout_to_error() {
        let (tool, _) = tool_with(vec![ExecutionResult::timed_out("", "", 2.0)]);

        let err = tool
            .execute(json!({"code": "while True: pass"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionTimeout { .. }));
    }

    #[tokio::test]
    async fn test_json_surface_requires_code() {
        let (tool, _) = tool_with(vec![]);

        let err = tool.execute(json!({"script": "print(1)"})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_json_surface_returns_result_payload() {
        let (tool, _) = tool_with(vec![ExecutionResult::completed(1, "", "boom", 0.1)]);

        let value = tool.execute(json!({"code": "print(2 + 2)"})).await.unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["exit_code"], json!(1));
        assert_eq!(value["stderr"], json!("boom"));
    }
}
