//! Order-preserving parallel dispatch with per-task deadlines.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;

use airlock_core::{ErrorInfo, Result, ToolInvocation, ToolResult};

// =============================================================================
// Parallel Tool Executor
// =============================================================================

/// Bounded-concurrency orchestrator for one batch of tool invocations.
///
/// Holds no cross-task mutable state beyond the concurrency limiter;
/// results are collected by joining spawned tasks in input order, so the
/// returned list's positions always match the input positions regardless
/// of completion order.
#[derive(Debug, Clone)]
pub struct ParallelToolExecutor {
    max_parallelism: usize,
    task_timeout: Option<Duration>,
}

impl ParallelToolExecutor {
    /// Create an executor running at most `max_parallelism` invocations
    /// concurrently (clamped to at least 1).
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
            task_timeout: None,
        }
    }

    /// Set the per-task timeout. `None` disables it, for callers that
    /// predate per-task deadlines.
    pub fn with_task_timeout(mut self, task_timeout: Option<Duration>) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    /// Run every invocation through `tool_fn`, at most `max_parallelism`
    /// at a time.
    ///
    /// The returned list is ordered identically to `invocations` and always
    /// has the same length. Errors, panics, and timeouts inside one
    /// invocation's `tool_fn` are converted into that invocation's
    /// `ToolResult.error` and never cancel or delay any other invocation.
    pub async fn execute_parallel<F, Fut>(
        &self,
        invocations: Vec<ToolInvocation>,
        tool_fn: F,
    ) -> Vec<ToolResult>
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let tool_fn = Arc::new(tool_fn);
        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let task_timeout = self.task_timeout;

        tracing::debug!(
            batch_size = invocations.len(),
            max_parallelism = self.max_parallelism,
            task_timeout = ?task_timeout,
            "dispatching tool batch"
        );

        let mut handles = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            let tool_fn = tool_fn.clone();
            let semaphore = semaphore.clone();
            let spawned_at = Instant::now();
            let correlation = (invocation.invocation_id.clone(), invocation.tool_name.clone());

            let handle = tokio::spawn(run_one(invocation, tool_fn, semaphore, task_timeout));
            handles.push((correlation, spawned_at, handle));
        }

        // Join in input order; completion order is irrelevant.
        let mut results = Vec::with_capacity(handles.len());
        for ((invocation_id, tool_name), spawned_at, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                // A panic inside tool_fn is confined to its own task.
                Err(join_err) => {
                    tracing::error!(invocation_id = %invocation_id, error = %join_err, "tool task panicked");
                    ToolResult::err(
                        invocation_id,
                        tool_name,
                        ErrorInfo::new("internal", format!("tool task panicked: {join_err}")),
                        spawned_at.elapsed().as_secs_f64() * 1000.0,
                    )
                }
            };
            results.push(result);
        }
        results
    }
}

async fn run_one<F, Fut>(
    invocation: ToolInvocation,
    tool_fn: Arc<F>,
    semaphore: Arc<Semaphore>,
    task_timeout: Option<Duration>,
) -> ToolResult
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");

    // The clock starts at dispatch, once a slot is held; queue time is not
    // billed against the task's deadline.
    let started = Instant::now();
    let fut = tool_fn(invocation.tool_name.clone(), invocation.arguments.clone());

    let outcome = match task_timeout {
        Some(deadline) => match tokio::time::timeout(deadline, fut).await {
            Ok(outcome) => outcome,
            // Dropping the timed-out future unblocks its await point; any
            // in-flight sandbox teardown is issued by the backend's guard.
            Err(_) => {
                let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                tracing::warn!(
                    invocation_id = %invocation.invocation_id,
                    tool = %invocation.tool_name,
                    duration_ms,
                    "tool invocation timed out; cancelling it only"
                );
                return ToolResult::err(
                    invocation.invocation_id,
                    invocation.tool_name,
                    ErrorInfo::new(
                        "task_timeout",
                        format!(
                            "tool did not return within {:.2}s",
                            deadline.as_secs_f64()
                        ),
                    ),
                    duration_ms,
                );
            }
        },
        None => fut.await,
    };

    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    match outcome {
        Ok(value) => ToolResult::ok(
            invocation.invocation_id,
            invocation.tool_name,
            value,
            duration_ms,
        ),
        Err(err) => {
            tracing::debug!(
                invocation_id = %invocation.invocation_id,
                tool = %invocation.tool_name,
                kind = err.kind(),
                "tool invocation failed"
            );
            ToolResult::err(
                invocation.invocation_id,
                invocation.tool_name,
                ErrorInfo::from(&err),
                duration_ms,
            )
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_parallelism_is_clamped() {
        let executor = ParallelToolExecutor::new(0);
        assert_eq!(executor.max_parallelism, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_yields_empty_results() {
        let executor = ParallelToolExecutor::new(4);
        let results = executor
            .execute_parallel(vec![], |_name, _args| async { Ok(json!(null)) })
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_results_correlate_by_invocation_id() {
        let executor = ParallelToolExecutor::new(2);
        let invocations = vec![
            ToolInvocation::new("a", "echo", json!({"v": 1})),
            ToolInvocation::new("b", "echo", json!({"v": 2})),
        ];

        let results = executor
            .execute_parallel(invocations, |_name, args| async move { Ok(args["v"].clone()) })
            .await;

        assert_eq!(results[0].invocation_id, "a");
        assert_eq!(results[0].result, Some(json!(1)));
        assert_eq!(results[1].invocation_id, "b");
        assert_eq!(results[1].result, Some(json!(2)));
    }
}
