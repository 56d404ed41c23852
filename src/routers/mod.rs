//! HTTP surface: the chat-completions endpoint (C6 dispatch), a health
//! check, and a byte-forward fallback for everything else.
//!
//! Grounded on the tower-http layer stack (`TraceLayer`, `TimeoutLayer`,
//! request-id) assembled in `model_gateway/src/main.rs`'s router builder.

pub mod dispatcher;
pub mod forward;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::core::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.config.request_timeout);
    let header_name = axum::http::HeaderName::from_static("x-request-id");

    Router::new()
        .route("/v1/chat/completions", post(dispatcher::dispatch))
        .route("/chat/completions", post(dispatcher::dispatch))
        .route("/health", get(forward::health))
        .fallback(forward::forward)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(PropagateRequestIdLayer::new(header_name)),
        )
}
