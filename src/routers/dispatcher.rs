//! C6: the Request Dispatcher. Picks one of the three streaming modes
//! per §4.6's table and hands off to C4 (orchestrator) and/or C5 (sse).
//!
//! Grounded on the mode-selection `if stream { ... } else { ... }` shape in
//! `model_gateway/src/routers/openai/responses/non_streaming.rs`, split
//! three ways here because the spec's hybrid mode has no analogue there.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chat_protocol::ChatRequest;
use reqwest::header::AUTHORIZATION;
use tracing::Instrument;

use crate::core::{orchestrator, sse, AppState};
use crate::error::GatewayError;

/// `Authorization` precedence: a configured `UPSTREAM_API_KEY` always wins,
/// otherwise the client's own header (if any) is forwarded unchanged.
fn resolve_auth(state: &AppState, headers: &HeaderMap) -> Option<HeaderValue> {
    if let Some(key) = &state.config.upstream_api_key {
        return HeaderValue::from_str(&format!("Bearer {key}")).ok();
    }
    headers.get(AUTHORIZATION).cloned()
}

pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut request): Json<ChatRequest>,
) -> Result<Response, GatewayError> {
    state.apply_request_hooks(&mut request);
    let auth = resolve_auth(&state, &headers);
    // A child of the process-wide shutdown token — fires on SIGINT/SIGTERM,
    // not on this request's own client disconnecting. A disconnect is
    // instead handled by axum dropping this handler's future outright,
    // which cancels whatever `.await` the orchestrator is suspended at.
    let cancel = state.shutdown.child_token();
    let span = tracing::info_span!("dispatch", model = %request.model, stream = request.wants_stream());

    async move {
        if !request.wants_stream() {
            return non_streaming(&state, &request, auth, &cancel).await;
        }

        if !state.config.enable_hybrid_streaming || state.registry.is_empty() {
            return pass_through(&state, &request, auth).await;
        }

        hybrid(&state, &request, auth, &cancel).await
    }
    .instrument(span)
    .await
}

/// Non-stream-with-tools: run the bounded tool loop, return its terminal
/// response verbatim (round-trip law: no tools triggered ⇒ identical to a
/// single forwarded call).
async fn non_streaming(
    state: &AppState,
    request: &ChatRequest,
    auth: Option<HeaderValue>,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<Response, GatewayError> {
    match orchestrator::run(&state.upstream, &state.registry, &state.config, request, auth, cancel).await? {
        orchestrator::LoopOutcome::Completed(result) => Ok(Json(result.response).into_response()),
        orchestrator::LoopOutcome::Canceled => Ok(canceled_response()),
    }
}

/// Pass-through streaming: hybrid disabled, or no backends configured.
/// Forward the client's request unchanged and relay upstream bytes as-is —
/// no tool augmentation, no reassembly.
async fn pass_through(
    state: &AppState,
    request: &ChatRequest,
    auth: Option<HeaderValue>,
) -> Result<Response, GatewayError> {
    let upstream = state.upstream.call_streaming(request, auth.as_ref()).await?;
    Ok(sse::relay(upstream))
}

/// Hybrid streaming: run the non-streamed tool loop to determine
/// termination, then reissue the exact terminal `messages`/`tools` state
/// with `stream=true` and relay that single call's output to the client.
async fn hybrid(
    state: &AppState,
    request: &ChatRequest,
    auth: Option<HeaderValue>,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<Response, GatewayError> {
    let result = match orchestrator::run(&state.upstream, &state.registry, &state.config, request, auth.clone(), cancel).await? {
        orchestrator::LoopOutcome::Completed(result) => result,
        orchestrator::LoopOutcome::Canceled => return Ok(canceled_response()),
    };

    let final_request = ChatRequest {
        model: request.model.clone(),
        messages: result.messages,
        tools: result.tools,
        stream: Some(true),
        extra: request.extra.clone(),
    };
    let upstream = state.upstream.call_streaming(&final_request, auth.as_ref()).await?;
    Ok(sse::relay(upstream))
}

fn canceled_response() -> Response {
    (
        axum::http::StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "error": { "type": "canceled", "message": "request canceled" }
        })),
    )
        .into_response()
}
