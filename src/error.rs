//! `GatewayError`: the C4/C5/C6 boundary error type. Per-call tool failures
//! don't reach here through the normal path — [`toolhost::ToolHostError`] is
//! folded into tool-role message content inside the invoker (§7 "tool
//! failures are in-band") and `invoke_batch` never returns a `Result`. The
//! `From<toolhost::ToolHostError>` impl below exists for any `toolhost` call
//! outside that batch path, where there is no assistant turn to hand a
//! failure to and it must surface out-of-band instead, per §7's rule of
//! thumb.

use axum::body::Bytes;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Upstream answered with a non-2xx status. Forwarded to the client
    /// verbatim: same status, same body, same content type.
    #[error("upstream returned {status}")]
    UpstreamHttp {
        status: StatusCode,
        body: Bytes,
        content_type: Option<HeaderValue>,
    },

    /// Dial or read failure talking to upstream (connection refused, reset,
    /// DNS failure, TLS handshake failure, …).
    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    /// The upstream stream closed before `[DONE]` and no assistant content
    /// had been produced yet — nothing usable to hand back to the client.
    #[error("upstream stream ended before completion with no content produced")]
    UpstreamTruncated,

    /// Startup-time configuration failure. Never converted to an HTTP
    /// response in practice (the process exits before binding), but an
    /// `IntoResponse` impl is provided for uniformity with the other variants.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A `toolhost::ToolHostError` that escaped the invoker's normal
    /// in-band handling (every per-call failure C3 produces is folded into
    /// a tool-message `content` string, never propagated as a `Result`).
    /// This variant exists as the C4/C5/C6 boundary's catch-all for any
    /// direct `toolhost` call outside that batch path — surfaced out-of-band
    /// since, unlike a single tool call's failure, there is no assistant
    /// turn left to hand the error to.
    #[error("tool host error: {0}")]
    ToolHost(#[from] toolhost::ToolHostError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::UpstreamHttp {
                status,
                body,
                content_type,
            } => {
                let mut response = Response::builder().status(status);
                if let Some(ct) = content_type {
                    response = response.header(axum::http::header::CONTENT_TYPE, ct);
                }
                response
                    .body(axum::body::Body::from(body))
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "failed to build passthrough error response");
                        internal_error("response_build_failed", "failed to build response")
                    })
            }
            GatewayError::UpstreamTransport(detail) => {
                bad_gateway("upstream_transport_error", detail)
            }
            GatewayError::UpstreamTruncated => bad_gateway(
                "upstream_truncated",
                "upstream stream ended before completion",
            ),
            GatewayError::ConfigInvalid(detail) => internal_error("config_invalid", detail),
            GatewayError::ToolHost(detail) => bad_gateway("tool_host_error", detail.to_string()),
        }
    }
}

fn bad_gateway(code: &'static str, message: impl Into<String>) -> Response {
    create_error(StatusCode::BAD_GATEWAY, code, message)
}

fn internal_error(code: &'static str, message: impl Into<String>) -> Response {
    create_error(StatusCode::INTERNAL_SERVER_ERROR, code, message)
}

fn create_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "type": code,
                "message": message.into(),
            }
        })),
    )
        .into_response()
}
