//! Wire types for the OpenAI-compatible chat-completions schema.
//!
//! These are the types the orchestrator mutates (`messages`, `tools`) and
//! the types it must otherwise leave untouched. Unknown top-level fields on
//! [`ChatRequest`] and [`ChatResponse`] are preserved via `#[serde(flatten)]`
//! so vendor extensions round-trip even though this crate doesn't know
//! about them.

pub mod stream;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat-completions request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ChatRequest {
    /// True if the client asked for a streaming response.
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// One entry of `messages`.
///
/// Modeled as a sum type keyed by `role` rather than a single open struct,
/// per the "runtime-typed message shapes" design note: role-specific
/// payloads are validated at ingress and re-serialized at egress, with
/// `#[serde(tag = "role")]` doing the dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role")]
#[serde(rename_all = "lowercase")]
pub enum Message {
    System(ContentMessage),
    User(ContentMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
}

impl Message {
    pub fn assistant_tool_calls(&self) -> Option<&[ToolCall]> {
        match self {
            Message::Assistant(m) => m.tool_calls.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMessage {
    pub tool_call_id: String,
    pub content: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// `{ id, type: "function", function: { name, arguments } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments object, per the OpenAI wire format.
    pub arguments: String,
}

/// The OpenAI tool-schema object advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSpec {
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionDef,
}

impl ToolSpec {
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

/// A non-streaming chat-completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub choices: Vec<Choice>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    pub fn first_message(&self) -> Option<&Message> {
        self.choices.first().map(|c| &c.message)
    }
}

/// Merge backend-derived tool specs into the request's `tools`, client
/// entries winning on name conflict. Mirrors spec §4.4 Augment.
pub fn merge_tool_specs(client_tools: Option<Vec<ToolSpec>>, catalog: &[ToolSpec]) -> Vec<ToolSpec> {
    let mut by_name: HashMap<String, ToolSpec> = HashMap::new();
    for spec in catalog {
        by_name.insert(spec.name().to_string(), spec.clone());
    }
    if let Some(client_tools) = client_tools {
        for spec in client_tools {
            by_name.insert(spec.name().to_string(), spec);
        }
    }
    let mut merged: Vec<ToolSpec> = by_name.into_values().collect();
    merged.sort_by(|a, b| a.name().cmp(b.name()));
    merged
}
