//! C4: the bounded tool-calling loop. One call site backs both the
//! non-streaming-with-tools dispatch path and the non-streamed rounds of
//! hybrid streaming — both need "run rounds until the model stops asking
//! for tools (or the budget runs out)", they differ only in what the
//! caller does with the result.
//!
//! Grounded on `model_gateway/src/routers/anthropic/messages/non_streaming.rs`'s
//! `execute_tool_loop` (iterate, extract tool calls, execute, append,
//! re-call) adapted per spec §9's resolved Open Question: round exhaustion
//! returns the last assistant message as-is instead of that source's hard
//! `mcp_max_iterations` error.

use std::time::Duration;

use axum::http::HeaderValue;
use chat_protocol::{merge_tool_specs, ChatRequest, ChatResponse, Message, ToolCall, ToolMessage};
use tokio_util::sync::CancellationToken;
use toolhost::{invoke_batch, ToolInvocation, ToolRegistry};
use tracing::warn;

use crate::config::Config;
use crate::core::upstream::UpstreamClient;
use crate::error::GatewayError;

/// The last upstream response reached by the loop, plus enough bookkeeping
/// for a hybrid-mode caller to reissue an equivalent streamed final call.
pub struct LoopResult {
    /// The last `ChatResponse` received from upstream, returned verbatim by
    /// the non-streaming dispatch path (round-trip law: no tools triggered
    /// ⇒ this is exactly the single upstream response, untouched).
    pub response: ChatResponse,
    /// The `messages` array submitted to produce `response` — the state a
    /// hybrid-mode final streaming call should resend.
    pub messages: Vec<Message>,
    /// The merged (client + catalog) tool set used for the terminal round —
    /// a hybrid-mode final streaming call resends this too, not just the
    /// client's original `tools`.
    pub tools: Option<Vec<chat_protocol::ToolSpec>>,
    pub upstream_calls: u32,
    pub max_rounds_reached: bool,
}

pub enum LoopOutcome {
    Completed(LoopResult),
    /// The process is shutting down (`cancel` is a child of the
    /// process-wide shutdown token, canceled on SIGINT/SIGTERM — see
    /// `AppState::shutdown`) while a suspension point was pending. An
    /// ordinary client disconnect is not observed through this token: axum
    /// drops the request's service future when the connection closes, so
    /// that case is handled by Tokio canceling the in-flight `.await`s
    /// directly rather than by anything checking `cancel`. Per §5/§7, this
    /// is represented as an early return rather than a `GatewayError`
    /// variant — there is no response to construct, the caller's job is
    /// just to stop promptly.
    Canceled,
}

/// Merge backend ToolSpecs into the request's `tools`, per §4.4 Augment.
fn augmented_tools(
    request: &ChatRequest,
    registry: &ToolRegistry,
) -> Option<Vec<chat_protocol::ToolSpec>> {
    let catalog: Vec<chat_protocol::ToolSpec> = registry
        .list_exposed_tools()
        .into_iter()
        .map(|entry| chat_protocol::ToolSpec {
            kind: "function".to_string(),
            function: chat_protocol::FunctionDef {
                name: entry.qualified_name,
                description: entry.schema.description,
                parameters: entry.schema.parameters,
            },
        })
        .collect();

    if catalog.is_empty() && request.tools.is_none() {
        return None;
    }
    Some(merge_tool_specs(request.tools.clone(), &catalog))
}

fn round_request(request: &ChatRequest, messages: &[Message], tools: &Option<Vec<chat_protocol::ToolSpec>>) -> ChatRequest {
    ChatRequest {
        model: request.model.clone(),
        messages: messages.to_vec(),
        tools: tools.clone(),
        stream: Some(false),
        extra: request.extra.clone(),
    }
}

/// Run the bounded tool loop to completion (or cancellation). `request` is
/// never mutated — only a local copy of `messages` is (§4.4 Idempotence).
pub async fn run(
    upstream: &UpstreamClient,
    registry: &ToolRegistry,
    config: &Config,
    request: &ChatRequest,
    auth: Option<HeaderValue>,
    cancel: &CancellationToken,
) -> Result<LoopOutcome, GatewayError> {
    let tools = augmented_tools(request, registry);
    let mut messages = request.messages.clone();
    let mut upstream_calls: u32 = 0;

    loop {
        let current_request = round_request(request, &messages, &tools);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(LoopOutcome::Canceled),
            result = upstream.call_non_streaming(&current_request, auth.as_ref()) => result?,
        };
        upstream_calls += 1;
        let round = upstream_calls - 1;

        let message = response
            .first_message()
            .cloned()
            .ok_or_else(|| GatewayError::UpstreamTransport("upstream returned no choices".into()))?;
        let tool_calls: Vec<ToolCall> = message.assistant_tool_calls().unwrap_or_default().to_vec();

        if tool_calls.is_empty() {
            return Ok(LoopOutcome::Completed(LoopResult {
                response,
                messages,
                tools: tools.clone(),
                upstream_calls,
                max_rounds_reached: false,
            }));
        }

        if round >= config.max_tool_rounds {
            warn!(
                event = "MaxRoundsReached",
                upstream_calls,
                max_tool_rounds = config.max_tool_rounds,
                "tool loop exhausted round budget with pending tool calls"
            );
            return Ok(LoopOutcome::Completed(LoopResult {
                response,
                messages,
                tools: tools.clone(),
                upstream_calls,
                max_rounds_reached: true,
            }));
        }

        let batch = tool_calls
            .iter()
            .map(|call| ToolInvocation {
                tool_call_id: call.id.clone(),
                tool_name: call.function.name.clone(),
                arguments_json: call.function.arguments.clone(),
            })
            .collect();

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(LoopOutcome::Canceled),
            results = invoke_batch(registry, batch, Duration::from_secs(config.tool_execution_timeout)) => results,
        };

        // The assistant message (with tool_calls) is appended alongside the
        // tool-role results — upstream needs it to associate them (§4.4 Append).
        messages.push(message);
        for result in results {
            messages.push(Message::Tool(ToolMessage {
                tool_call_id: result.tool_call_id,
                content: result.content,
                extra: Default::default(),
            }));
        }
    }
}
