//! C4 (orchestrator), C5 (SSE reassembler/relay), and the shared upstream
//! HTTP client they both sit on top of.

pub mod orchestrator;
pub mod sse;
pub mod upstream;

use std::sync::Arc;

use chat_protocol::ChatRequest;
use tokio_util::sync::CancellationToken;
use toolhost::ToolRegistry;

use crate::config::Config;
use upstream::UpstreamClient;

/// A pre-dispatch transform. Non-core extension point — ships empty; §9
/// names this as future surface for request rewriting (header injection,
/// model aliasing, …) without committing to any concrete hook now.
pub type RequestHook = Box<dyn Fn(&mut ChatRequest) + Send + Sync>;

/// Everything a request handler needs, shared read-only after startup.
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: UpstreamClient,
    pub registry: Arc<ToolRegistry>,
    /// Parent of every in-flight request's cancellation token. Canceling
    /// this (on graceful shutdown) cancels every request still running its
    /// tool loop, rather than leaving them to run out the request timeout.
    /// This is the *process* shutdown signal only — an individual client
    /// disconnecting mid-request does not cancel this token or its
    /// children; axum/hyper simply drop that request's service future, and
    /// the orchestrator's in-flight `.await`s are canceled by that drop the
    /// same way any other dropped future would be, not by `cancel` firing.
    pub shutdown: CancellationToken,
    pub request_hooks: Vec<RequestHook>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        upstream: UpstreamClient,
        registry: Arc<ToolRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            upstream,
            registry,
            shutdown: CancellationToken::new(),
            request_hooks: Vec::new(),
        })
    }

    pub fn apply_request_hooks(&self, request: &mut ChatRequest) {
        for hook in &self.request_hooks {
            hook(request);
        }
    }
}
