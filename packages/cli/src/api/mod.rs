use axum::{
    routing::{delete, get, post},
    Router,
};
use previewbox_sandboxes::SandboxManager;
use std::sync::Arc;

pub mod health;
pub mod sandbox;

/// Shared state for the sandbox endpoints
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SandboxManager>,
}

impl AppState {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/sandbox/create", post(sandbox::create_sandbox))
        .route("/sandbox/status/{sbx_id}", get(sandbox::get_status))
        .route(
            "/sandbox/file/{sbx_id}",
            get(sandbox::get_file).patch(sandbox::update_file),
        )
        .route(
            "/sandbox/files/{sbx_id}",
            get(sandbox::list_files).post(sandbox::apply_files),
        )
        .route("/sandbox/{sbx_id}", delete(sandbox::delete_sandbox))
        .with_state(state)
}
