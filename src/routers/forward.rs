//! Fallback for any path other than the chat-completions endpoint: forward
//! the request to upstream byte-for-byte and stream the response back,
//! preserving status code. Lets the proxy sit in front of a full
//! OpenAI-compatible surface (models list, embeddings, …) without knowing
//! about any of it.
//!
//! Grounded on the hop-by-hop header stripping in
//! `model_gateway/src/routers/forward.rs`'s passthrough handler.

use std::io;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;

use crate::core::AppState;
use crate::error::GatewayError;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "authorization",
];

pub async fn forward(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(uri.path());
    let url = format!(
        "{}{}",
        state.config.upstream_base_url.trim_end_matches('/'),
        path_and_query
    );

    let mut request = state.upstream.http().request(method, url).body(body.to_vec());

    for (name, value) in headers.iter() {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            request = request.header(name, value);
        }
    }
    // §6: a configured UPSTREAM_API_KEY always wins; otherwise forward the
    // client's own Authorization header unchanged (stripped above so it
    // isn't duplicated when absent from config).
    request = match &state.config.upstream_api_key {
        Some(key) => request.header(AUTHORIZATION, format!("Bearer {key}")),
        None => match headers.get(AUTHORIZATION) {
            Some(value) => request.header(AUTHORIZATION, value.as_bytes()),
            None => request,
        },
    };

    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))?;

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers().iter() {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            if let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes()) {
                builder = builder.header(name, value.as_bytes());
            }
        }
    }

    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string())));

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| GatewayError::UpstreamTransport(format!("building forwarded response: {e}")))
        .map(IntoResponse::into_response)
}

pub async fn health() -> Response {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
        .into_response()
}
