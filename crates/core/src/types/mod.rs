mod execution;
mod invocation;
mod limits;

pub use execution::{ExecutionResult, ExecutionStatus};
pub use invocation::{ErrorInfo, ToolInvocation, ToolResult};
pub use limits::{NetworkMode, ResourceLimits};
