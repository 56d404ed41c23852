//! Process bootstrap: parse configuration, stand up the tool registry and
//! upstream client, serve the router, and shut down gracefully. Everything
//! under `lib.rs` is reusable and unit-testable independent of this file.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use toolhost::ToolRegistry;
use tracing_subscriber::EnvFilter;

use toolproxy::core::upstream::UpstreamClient;
use toolproxy::core::AppState;
use toolproxy::{routers, Config};

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_tracing(config.debug);

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    let backends = match config.load_backends() {
        Ok(backends) => backends,
        Err(e) => {
            tracing::error!(error = %e, "failed to load backend list");
            std::process::exit(1);
        }
    };
    tracing::info!(count = backends.len(), "starting tool backends");
    let registry = ToolRegistry::start(backends).await;

    let upstream = match UpstreamClient::build(&config) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build upstream client");
            std::process::exit(1);
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(addr, "listening");

    let state = AppState::new(Arc::new(config), upstream, registry.clone());
    let app = routers::build(state.clone());

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await;

    registry.shutdown().await;

    if let Err(e) = serve_result {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Waits for SIGINT/SIGTERM, then cancels the shared token so every
/// in-flight request's orchestrator loop aborts at its next suspension
/// point instead of running out the request timeout (§5 Cancellation).
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
    state.shutdown.cancel();
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("toolproxy={default_level},toolhost={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .init();
}
