//! Shared scaffolding for the scenario tests in `dispatch_scenarios.rs`: a
//! real mock upstream gateway bound to a loopback port (picked via
//! `portpicker`, the reason that dev-dependency exists), and a builder for
//! the proxy's own `Router` wired against it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::stream;
use serde_json::{json, Value};
use toolhost::{BackendDescriptor, ToolRegistry};
use toolproxy::core::upstream::UpstreamClient;
use toolproxy::core::AppState;
use toolproxy::Config;

/// A running mock upstream gateway. Dropping this leaves the background
/// task running until the test process exits — fine for short-lived tests.
pub struct MockUpstream {
    pub base_url: String,
}

pub async fn start_mock_upstream() -> MockUpstream {
    let port = portpicker::pick_unused_port().expect("no free port for mock upstream");
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind mock upstream");
    let app = Router::new().route("/v1/chat/completions", post(upstream_handler));
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    MockUpstream {
        base_url: format!("http://127.0.0.1:{port}"),
    }
}

/// Scripted upstream behavior, keyed off `model` (which scenario) and
/// whether the conversation already contains a tool-role message (which
/// round). Mirrors a real upstream closely enough to exercise the
/// orchestrator/dispatcher without needing a real inference backend.
async fn upstream_handler(Json(body): Json<Value>) -> Response {
    let model = body["model"].as_str().unwrap_or_default().to_string();
    let stream = body["stream"].as_bool().unwrap_or(false);
    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let has_tool_reply = messages.iter().any(|m| m["role"] == "tool");

    if stream {
        return sse_response(&model, has_tool_reply);
    }

    let response = match model.as_str() {
        "s1-no-tools" => assistant_content("hello"),
        "s2-one-round" => {
            if has_tool_reply {
                assistant_content("done")
            } else {
                assistant_tool_call("c1", "echo", r#"{"message":"x"}"#)
            }
        }
        "s3-timeout" => {
            if has_tool_reply {
                assistant_content("done")
            } else {
                assistant_tool_call("c1", "slow", r#"{"secs":5}"#)
            }
        }
        "s4-always-tool" => assistant_tool_call("cN", "echo", r#"{"message":"again"}"#),
        other => assistant_content(&format!("unhandled scenario: {other}")),
    };
    Json(response).into_response()
}

fn assistant_content(content: &str) -> Value {
    json!({
        "id": "resp-1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn assistant_tool_call(id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "id": "resp-1",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments}
                }]
            },
            "finish_reason": "tool_calls"
        }]
    })
}

fn sse_response(model: &str, has_tool_reply: bool) -> Response {
    let frames: Vec<String> = match model {
        "s5-pass-through" => vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"He\"}}]}\n\n".to_string(),
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"llo\"}}]}\n\n".to_string(),
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n"
                .to_string(),
            "data: [DONE]\n\n".to_string(),
        ],
        "s2-one-round" if has_tool_reply => vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"do\"}}]}\n\n".to_string(),
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ne\"}}]}\n\n".to_string(),
            "data: [DONE]\n\n".to_string(),
        ],
        _ => vec!["data: [DONE]\n\n".to_string()],
    };

    let body_stream = stream::iter(
        frames
            .into_iter()
            .map(|frame| Ok::<_, std::io::Error>(bytes::Bytes::from(frame))),
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub struct TestApp {
    pub router: Router,
}

pub struct TestAppOptions {
    pub upstream_base_url: String,
    pub with_tool_backend: bool,
    pub max_tool_rounds: u32,
    pub tool_execution_timeout: u64,
    pub enable_hybrid_streaming: bool,
}

impl TestAppOptions {
    pub fn new(upstream_base_url: &str) -> Self {
        Self {
            upstream_base_url: upstream_base_url.to_string(),
            with_tool_backend: false,
            max_tool_rounds: 5,
            tool_execution_timeout: 30,
            enable_hybrid_streaming: false,
        }
    }
}

pub async fn build_test_app(opts: TestAppOptions) -> TestApp {
    let config = Arc::new(Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        debug: false,
        upstream_base_url: opts.upstream_base_url,
        upstream_api_key: None,
        max_tool_rounds: opts.max_tool_rounds,
        tool_execution_timeout: opts.tool_execution_timeout,
        enable_hybrid_streaming: opts.enable_hybrid_streaming,
        request_timeout: 300,
        max_connections: 100,
        max_keepalive_connections: 20,
        backend_list_path: None,
    });

    let backends = if opts.with_tool_backend {
        vec![BackendDescriptor {
            name: "debug".to_string(),
            command: env!("CARGO_BIN_EXE_mock_tool_backend").to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            workdir: None,
        }]
    } else {
        Vec::new()
    };
    let registry = ToolRegistry::start(backends).await;

    let upstream = UpstreamClient::build(&config).expect("build upstream client");
    let state = AppState::new(config, upstream, registry);
    TestApp {
        router: toolproxy::routers::build(state),
    }
}
