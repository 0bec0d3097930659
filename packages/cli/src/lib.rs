use axum::http::{header, HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod api;
pub mod config;
pub mod error;

#[cfg(test)]
mod tests;

use config::{Config, ConfigError};
use previewbox_sandboxes::{DockerEngine, InMemorySandboxStore, SandboxManager, SandboxWorkspace};

pub async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let engine = DockerEngine::connect()?;
    if !engine.is_available().await {
        warn!("Docker daemon is not reachable; sandboxes will fail until it is");
    }

    tokio::fs::create_dir_all(&config.sandbox_root).await?;
    let sandbox_root = tokio::fs::canonicalize(&config.sandbox_root).await?;
    info!("Sandbox trees live under {}", sandbox_root.display());

    let manager = Arc::new(SandboxManager::new(
        Arc::new(engine),
        Arc::new(InMemorySandboxStore::new()),
        SandboxWorkspace::new(sandbox_root),
        config.provision_settings(),
    ));

    let reaper = manager.start_reaper(config.reaper_interval(), config.sandbox_ttl());

    let app = api::create_router(api::AppState::new(manager.clone()))
        .layer(cors_layer(&config.cors_origin)?)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    info!("previewbox listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = reaper {
        handle.abort();
    }
    info!("Tearing down live sandboxes");
    manager.shutdown().await;

    Ok(())
}

/// CORS for the sandbox routes; `*` allows any origin
pub fn cors_layer(origin: &str) -> Result<CorsLayer, ConfigError> {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origin == "*" {
        return Ok(layer.allow_origin(Any));
    }

    let origin = origin
        .parse::<HeaderValue>()
        .map_err(|_| ConfigError::InvalidCorsOrigin(origin.to_string()))?;
    Ok(layer.allow_origin(origin))
}

/// Resolves on ctrl-c, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
