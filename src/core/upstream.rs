//! The single HTTP client pool to the upstream gateway (§5 Shared resources)
//! and the two call shapes C4/C6 need: a buffered non-streaming call and a
//! raw streaming call whose body the caller relays or reassembles.

use axum::http::HeaderValue;
use chat_protocol::ChatRequest;
use reqwest::header::AUTHORIZATION;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::error::GatewayError;

/// The single HTTP client pool to upstream, bounded to `MAX_CONNECTIONS`
/// total in-flight requests (§5 Shared resources). `reqwest` itself only
/// exposes a per-host *idle keepalive* cap (`pool_max_idle_per_host`,
/// `MAX_KEEPALIVE_CONNECTIONS`); the total-connection ceiling is enforced
/// here with a semaphore around every call.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    connection_limit: Arc<Semaphore>,
}

impl UpstreamClient {
    pub fn build(config: &Config) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_keepalive_connections)
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self {
            http,
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// The raw pooled client, for the byte-forward fallback path which
    /// needs to build arbitrary method/path requests this type doesn't
    /// otherwise expose.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    async fn send(
        &self,
        request: &ChatRequest,
        auth: Option<&HeaderValue>,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut payload = request.clone();
        payload.stream = Some(stream);

        let mut builder = self.http.post(self.endpoint()).json(&payload);
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth.as_bytes());
        }

        // Bounds total concurrent upstream requests to MAX_CONNECTIONS
        // (§5 Shared resources); the permit is dropped once the response
        // headers are back, matching what `reqwest`'s own pool accounts for.
        let _permit = self
            .connection_limit
            .acquire()
            .await
            .expect("connection_limit semaphore is never closed");
        builder
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))
    }

    /// Issue a `stream=false` call and parse the body as a `ChatResponse`.
    /// Non-2xx responses are surfaced as [`GatewayError::UpstreamHttp`] with
    /// the upstream status and body forwarded verbatim.
    pub async fn call_non_streaming(
        &self,
        request: &ChatRequest,
        auth: Option<&HeaderValue>,
    ) -> Result<chat_protocol::ChatResponse, GatewayError> {
        let response = self.send(request, auth, false).await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .cloned();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))?;

        if !status.is_success() {
            return Err(GatewayError::UpstreamHttp {
                status,
                body,
                content_type,
            });
        }

        serde_json::from_slice(&body).map_err(|e| {
            GatewayError::UpstreamTransport(format!("invalid JSON from upstream: {e}"))
        })
    }

    /// Issue a `stream=true` call and return the raw response for the
    /// caller to relay (C6 pass-through/hybrid) or reassemble (C5).
    /// Non-2xx responses are still buffered and surfaced as
    /// [`GatewayError::UpstreamHttp`] rather than streamed — there is no
    /// SSE body to relay if upstream rejected the request outright.
    pub async fn call_streaming(
        &self,
        request: &ChatRequest,
        auth: Option<&HeaderValue>,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = self.send(request, auth, true).await?;
        let status = response.status();
        if !status.is_success() {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .cloned();
            let body = response
                .bytes()
                .await
                .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))?;
            return Err(GatewayError::UpstreamHttp {
                status,
                body,
                content_type,
            });
        }
        Ok(response)
    }
}
