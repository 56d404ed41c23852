//! C1: the line-delimited JSON protocol spoken over a backend's stdio.
//!
//! One JSON object per line, no embedded unescaped newlines. Two methods:
//! `list_tools` and `call_tool`. Replies echo the request `id` exactly
//! once; anything else (unsolicited frames, duplicate ids) is the caller's
//! responsibility to detect and drop — see [`crate::session::BackendSession`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    ListTools {
        id: u64,
    },
    CallTool {
        id: u64,
        params: CallToolParams,
    },
}

impl Request {
    pub fn id(&self) -> u64 {
        match self {
            Request::ListTools { id } => *id,
            Request::CallTool { id, .. } => *id,
        }
    }

    /// Serialize to a single line (no trailing newline — the writer adds it).
    pub fn to_line(&self) -> serde_json::Result<String> {
        // The wire shape is `{ id, method, params? }`, not an internally
        // tagged enum whose tag sits next to `id`, so build the object by
        // hand instead of relying on derive(Serialize) field order.
        let value = match self {
            Request::ListTools { id } => serde_json::json!({ "id": id, "method": "list_tools" }),
            Request::CallTool { id, params } => serde_json::json!({
                "id": id,
                "method": "call_tool",
                "params": params,
            }),
        };
        serde_json::to_string(&value)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

/// A raw reply line, before it's matched against an in-flight request.
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseError {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

/// `{ content: string }`, the success payload of a `call_tool` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    pub content: String,
}

/// One entry of a `list_tools` reply — deliberately permissive (`extra`)
/// since the advertised schema is forwarded to the model largely as-is.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolSpecWire {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
}

fn default_parameters() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

pub fn parse_line(line: &str) -> serde_json::Result<RawResponse> {
    serde_json::from_str(line)
}
