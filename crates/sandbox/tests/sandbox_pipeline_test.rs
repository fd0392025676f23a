//! Sandbox pipeline integration tests.
//!
//! Tests the full path: CodeExecutionTool → CodeValidator → Sandbox
//! (MockSandbox). These tests do NOT require Docker or a cluster; the
//! mock backend provides deterministic behavior.

use std::sync::Arc;

use airlock_core::{Error, ExecutionResult, NetworkMode, ResourceLimits};
use airlock_sandbox::{CodeExecutionTool, MockSandbox, Sandbox};
use airlock_validator::CodeValidator;

// =============================================================================
// Helpers
// =============================================================================

fn validator() -> CodeValidator {
    CodeValidator::new(
        ["json", "math", "re"]
            .into_iter()
            .map(String::from)
            .collect(),
    )
}

fn tool_with(results: Vec<ExecutionResult>) -> (CodeExecutionTool, Arc<MockSandbox>) {
    let sandbox = Arc::new(MockSandbox::new(results));
    let tool = CodeExecutionTool::new(validator(), sandbox.clone(), ResourceLimits::default());
    (tool, sandbox)
}

// =============================================================================
// 1. Simple arithmetic executes end to end
// =============================================================================

#[tokio::test]
async fn test_arithmetic_pipeline() {
    let (tool, sandbox) = tool_with(vec![ExecutionResult::completed(0, "4\n", "", 0.05)]);

    let result = tool.run("print(2 + 2)").await.unwrap();
    assert!(result.success);
    assert!(result.stdout.contains('4'));
    assert!(!result.timed_out);
    assert_eq!(result.exit_code, Some(0));

    assert_eq!(sandbox.executed_codes().await, vec!["print(2 + 2)"]);
}

// =============================================================================
// 2. Disallowed import is stopped before the sandbox
// =============================================================================

#[tokio::test]
async fn test_disallowed_import_is_stopped_cold() {
    let (tool, sandbox) = tool_with(vec![]);

    let err = tool
        .run("import os\nos.system('echo hi')")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("'os'"), "error must name the module");
    assert!(!err.is_retryable());
    assert_eq!(
        sandbox.execution_count().await,
        0,
        "rejected code must never reach Sandbox::execute"
    );
}

// =============================================================================
// 3. Unparseable code is stopped before the sandbox
// =============================================================================

#[tokio::test]
async fn test_malformed_code_is_stopped_cold() {
    let (tool, sandbox) = tool_with(vec![]);

    for code in ["def f(:", "while", "print('unterminated"] {
        let err = tool.run(code).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "should reject: {code}");
    }
    assert_eq!(sandbox.execution_count().await, 0);
}

// =============================================================================
// 4. Deadline expiry surfaces as a timed-out result
// =============================================================================

#[tokio::test]
async fn test_unbounded_loop_times_out() {
    let (tool, sandbox) = tool_with(vec![ExecutionResult::timed_out("partial", "", 2.01)]);

    let result = tool.run("while True: pass").await.unwrap();
    assert!(result.timed_out);
    assert!(!result.success, "a timed-out execution is never successful");
    assert_eq!(result.exit_code, None);
    assert!(result.execution_time_seconds >= 2.0);
    assert_eq!(sandbox.execution_count().await, 1);
}

// =============================================================================
// 5. Guest failures are results, infrastructure failures are errors
// =============================================================================

#[tokio::test]
async fn test_guest_failure_is_a_result_not_an_error() {
    let (tool, _) = tool_with(vec![ExecutionResult::completed(
        1,
        "",
        "ZeroDivisionError: division by zero",
        0.1,
    )]);

    let result = tool.run("print(1 / 0)").await.unwrap();
    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert!(result.stderr.contains("ZeroDivisionError"));
}

// =============================================================================
// 6. Fail-closed network resolution ahead of any backend call
// =============================================================================

#[tokio::test]
async fn test_allowlist_resolves_to_none_without_egress_filter() {
    let sandbox: Arc<dyn Sandbox> = Arc::new(MockSandbox::default());
    assert!(!sandbox.supports_egress_filtering());

    let limits = ResourceLimits {
        network_mode: NetworkMode::Allowlist,
        allowed_domains: vec!["api.example.com".into()],
        ..Default::default()
    };

    let effective = limits.effective_network_mode(sandbox.supports_egress_filtering());
    assert_eq!(effective, NetworkMode::None, "must never degrade to unrestricted");
}
