//! C3: execute a batch of tool calls concurrently against the registry,
//! each with its own timeout. Never short-circuits — partial failure is
//! the norm, so every call in the batch yields a `{tool_call_id, content}`
//! entry regardless of how the others fared.
//!
//! Adapted from `execute_mcp_tool_calls`'s sequential `for` loop: that
//! loop is correct for ordering but violates the concurrency property (a
//! batch of N calls must complete in ~T, not N*T), so calls are launched
//! with `futures::future::join_all` instead.

use std::time::Duration;

use futures::future::join_all;
use tracing::warn;

use crate::error::ToolHostError;
use crate::registry::ToolRegistry;

/// One call to execute: the id the orchestrator will match the result
/// against, the tool name, and the raw (unparsed) JSON-string arguments.
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments_json: String,
}

/// Result of one invocation: always present, even on failure.
pub struct ToolInvocationResult {
    pub tool_call_id: String,
    pub content: String,
}

/// Run every invocation in `batch` concurrently, each bounded by
/// `per_call_timeout`. Output order matches input order.
pub async fn invoke_batch(
    registry: &ToolRegistry,
    batch: Vec<ToolInvocation>,
    per_call_timeout: Duration,
) -> Vec<ToolInvocationResult> {
    let futures = batch.into_iter().map(|invocation| async move {
        let content = run_one(registry, &invocation, per_call_timeout).await;
        ToolInvocationResult {
            tool_call_id: invocation.tool_call_id,
            content,
        }
    });
    join_all(futures).await
}

async fn run_one(
    registry: &ToolRegistry,
    invocation: &ToolInvocation,
    per_call_timeout: Duration,
) -> String {
    let arguments: serde_json::Value = match serde_json::from_str(&invocation.arguments_json) {
        Ok(v) => v,
        Err(e) => {
            return ToolHostError::ToolArgInvalid(e.to_string()).as_tool_content();
        }
    };

    match registry
        .invoke(&invocation.tool_name, arguments, per_call_timeout)
        .await
    {
        Ok(content) => content,
        Err(e) => {
            warn!(tool = %invocation.tool_name, error = %e, "tool invocation failed");
            e.as_tool_content()
        }
    }
}
