mod config;
mod dispatcher;
mod error;
mod routes;
mod types;
mod validator;

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::routes::{build_router, AppState};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zkverifier_gateway=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let engine = &config.engine;

    tracing::info!(
        "Verifier engine: `{}` (workdir={}, timeout={})",
        engine.display_command(),
        engine
            .working_dir
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "<inherited>".to_string()),
        engine
            .timeout
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_else(|| "none".to_string())
    );

    let dispatcher = Dispatcher::new(config.engine.clone());

    // Compile the engine once up front instead of on every request.
    if let Err(e) = dispatcher.prepare().await {
        tracing::error!("Verifier build step failed: {}", e.detail());
        panic!("Verifier build step failed: {}", e);
    }

    let state = Arc::new(AppState {
        dispatcher,
        max_body_bytes: config.max_body_bytes,
    });

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);

    tracing::info!("Verification gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            panic!("Failed to bind to {}: {}", addr, e);
        });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            panic!("Server error: {}", e);
        });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
