//! C5: the SSE Reassembler. Two independent modes over the same upstream
//! byte stream — relay (bytes pass straight through) and reassemble (build
//! a synthetic [`chat_protocol::ChatResponse`] from the deltas).
//!
//! Grounded on the buffer-then-split-on-frame-boundary idiom in
//! `model_gateway/src/routers/anthropic/sse.rs::consume_and_forward`,
//! simplified for the OpenAI `data: <json>\n\n` / `data: [DONE]` wire
//! format (no `event:` line to parse).

use std::collections::BTreeMap;
use std::io;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use chat_protocol::stream::StreamChunk;
use chat_protocol::{AssistantMessage, ChatResponse, Choice, FunctionCall, ToolCall};
use futures_util::StreamExt;
use tracing::warn;

use crate::error::GatewayError;

/// Relay an upstream streaming response to the client unchanged. Every
/// byte of every `data:` frame, including `[DONE]`, passes through exactly
/// as received — there is no line parsing on this path, per §4.5 "no
/// buffering beyond a single line" (here: no buffering at all, since there
/// is nothing to reassemble).
pub fn relay(upstream: reqwest::Response) -> Response {
    let stream = upstream.bytes_stream().map(|chunk| {
        chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    });

    Response::builder()
        .status(axum::http::StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .header(axum::http::header::CACHE_CONTROL, "no-cache")
        .header(axum::http::header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to build relay response");
            GatewayError::UpstreamTransport("failed to build streaming response".into())
                .into_response()
        })
}

/// Accumulator for one `tool_calls[index]` across the whole stream. Keyed
/// by `index` per the design note — promoting to a dense [`ToolCall`]
/// array only happens once, at `[DONE]`.
#[derive(Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    kind: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    fn merge(&mut self, delta: chat_protocol::stream::ToolCallDelta) {
        if self.id.is_none() {
            self.id = delta.id;
        }
        if self.kind.is_none() {
            self.kind = delta.kind;
        }
        if self.name.is_none() {
            self.name = delta.function.name;
        }
        if let Some(arguments) = delta.function.arguments {
            self.arguments.push_str(&arguments);
        }
    }

    fn finalize(self, index: u32) -> ToolCall {
        ToolCall {
            id: self.id.unwrap_or_else(|| format!("call_{index}")),
            kind: self.kind.unwrap_or_else(|| "function".to_string()),
            function: FunctionCall {
                name: self.name.unwrap_or_default(),
                arguments: if self.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    self.arguments
                },
            },
        }
    }
}

pub struct Reassembled {
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

/// Reassemble mode: build a single [`ChatResponse`]-equivalent message from
/// an upstream SSE stream. Used to validate the hybrid-stream/non-streaming
/// equivalence round-trip law (§8) and available as a fallback for any
/// upstream that only speaks streaming.
pub async fn reassemble(
    upstream: reqwest::Response,
) -> Result<Reassembled, GatewayError> {
    let mut stream = upstream.bytes_stream();
    let mut buffer = String::new();
    let mut content = String::new();
    let mut tool_calls: BTreeMap<u32, ToolCallAccumulator> = BTreeMap::new();
    let mut finish_reason = None;
    let mut saw_done = false;

    'frames: while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| GatewayError::UpstreamTransport(e.to_string()))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..pos + 2).collect();
            if process_frame(
                &frame,
                &mut content,
                &mut tool_calls,
                &mut finish_reason,
                &mut saw_done,
            ) {
                break 'frames;
            }
        }
    }

    if !saw_done && !buffer.trim().is_empty() {
        process_frame(
            &buffer,
            &mut content,
            &mut tool_calls,
            &mut finish_reason,
            &mut saw_done,
        );
    }

    if !saw_done && content.is_empty() && tool_calls.is_empty() {
        return Err(GatewayError::UpstreamTruncated);
    }
    if !saw_done {
        finish_reason = Some("length".to_string());
    }

    let dense_tool_calls = densify(tool_calls);

    Ok(Reassembled {
        message: AssistantMessage {
            content: if content.is_empty() { None } else { Some(content) },
            tool_calls: if dense_tool_calls.is_empty() {
                None
            } else {
                Some(dense_tool_calls)
            },
            extra: Default::default(),
        },
        finish_reason,
    })
}

/// Process one `data: ...\n\n` frame. Returns `true` if `[DONE]` was seen
/// (caller should stop reading further frames).
fn process_frame(
    frame: &str,
    content: &mut String,
    tool_calls: &mut BTreeMap<u32, ToolCallAccumulator>,
    finish_reason: &mut Option<String>,
    saw_done: &mut bool,
) -> bool {
    for line in frame.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            *saw_done = true;
            return true;
        }

        let parsed: StreamChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, frame = %data, "dropping unparseable SSE chunk");
                continue;
            }
        };

        let Some(choice) = parsed.choices.into_iter().next() else {
            continue;
        };
        if let Some(text) = choice.delta.content {
            content.push_str(&text);
        }
        if let Some(deltas) = choice.delta.tool_calls {
            for delta in deltas {
                tool_calls.entry(delta.index).or_default().merge(delta);
            }
        }
        if choice.finish_reason.is_some() {
            *finish_reason = choice.finish_reason;
        }
    }
    false
}

/// Promote the sparse index-keyed accumulator map into a dense
/// `0..N`-indexed array, synthesizing an error entry for any gap.
fn densify(mut tool_calls: BTreeMap<u32, ToolCallAccumulator>) -> Vec<ToolCall> {
    let Some(&max_index) = tool_calls.keys().max() else {
        return Vec::new();
    };
    let mut dense = Vec::with_capacity(max_index as usize + 1);
    for index in 0..=max_index {
        match tool_calls.remove(&index) {
            Some(acc) => dense.push(acc.finalize(index)),
            None => {
                warn!(index, "missing tool_call index in stream reassembly, synthesizing error entry");
                dense.push(ToolCall {
                    id: format!("missing_{index}"),
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: "unknown".to_string(),
                        arguments: "{}".to_string(),
                    },
                });
            }
        }
    }
    dense
}

/// Build a non-streaming [`ChatResponse`] from a reassembled message, for
/// tests that check reassembly against a real non-streaming call.
pub fn to_chat_response(reassembled: Reassembled, model: &str) -> ChatResponse {
    ChatResponse {
        id: None,
        choices: vec![Choice {
            index: 0,
            message: chat_protocol::Message::Assistant(reassembled.message),
            finish_reason: reassembled.finish_reason,
        }],
        extra: {
            let mut map = std::collections::HashMap::new();
            map.insert("model".to_string(), serde_json::json!(model));
            map
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    #[test]
    fn process_frame_concatenates_content() {
        let mut content = String::new();
        let mut tool_calls = BTreeMap::new();
        let mut finish_reason = None;
        let mut saw_done = false;

        for frag in ["hel", "lo"] {
            let frame = chunk(&format!(
                r#"{{"choices":[{{"index":0,"delta":{{"content":"{frag}"}}}}]}}"#
            ));
            process_frame(&frame, &mut content, &mut tool_calls, &mut finish_reason, &mut saw_done);
        }
        assert_eq!(content, "hello");
        assert!(!saw_done);
    }

    #[test]
    fn process_frame_detects_done() {
        let mut content = String::new();
        let mut tool_calls = BTreeMap::new();
        let mut finish_reason = None;
        let mut saw_done = false;
        let stopped = process_frame(
            "data: [DONE]\n\n",
            &mut content,
            &mut tool_calls,
            &mut finish_reason,
            &mut saw_done,
        );
        assert!(stopped);
        assert!(saw_done);
    }

    #[test]
    fn densify_fills_gaps_with_synthetic_error() {
        let mut tool_calls = BTreeMap::new();
        tool_calls.insert(0u32, {
            let mut acc = ToolCallAccumulator::default();
            acc.id = Some("c1".into());
            acc.name = Some("echo".into());
            acc.arguments = "{}".into();
            acc
        });
        tool_calls.insert(2u32, {
            let mut acc = ToolCallAccumulator::default();
            acc.id = Some("c3".into());
            acc.name = Some("echo".into());
            acc.arguments = "{}".into();
            acc
        });

        let dense = densify(tool_calls);
        assert_eq!(dense.len(), 3);
        assert_eq!(dense[0].id, "c1");
        assert_eq!(dense[1].function.name, "unknown");
        assert_eq!(dense[2].id, "c3");
    }

    #[test]
    fn tool_call_arguments_concatenate_in_arrival_order() {
        let mut acc = ToolCallAccumulator::default();
        acc.merge(chat_protocol::stream::ToolCallDelta {
            index: 0,
            id: Some("c1".into()),
            kind: Some("function".into()),
            function: chat_protocol::stream::FunctionCallDelta {
                name: Some("echo".into()),
                arguments: Some("{\"mess".into()),
            },
        });
        acc.merge(chat_protocol::stream::ToolCallDelta {
            index: 0,
            id: None,
            kind: None,
            function: chat_protocol::stream::FunctionCallDelta {
                name: None,
                arguments: Some("age\":\"x\"}".into()),
            },
        });
        let call = acc.finalize(0);
        assert_eq!(call.function.arguments, "{\"message\":\"x\"}");
    }
}
