use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use previewbox_sandboxes::SandboxError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Main application error type that all handlers should return
#[derive(Debug, Error)]
pub enum AppError {
    /// Rejected request; the message is returned to the client as is
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Wrap errors from the sandbox library
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Error body; keeps the `{ success, message }` shape every sandbox route returns
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    code: &'static str,
    request_id: String,
}

impl AppError {
    /// Convert AppError to appropriate HTTP status code and error code
    pub fn to_status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Sandbox(sandbox_error) => match sandbox_error {
                SandboxError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
                SandboxError::InvalidPath(_) => (StatusCode::BAD_REQUEST, "INVALID_PATH"),
                SandboxError::SandboxNotFound(_) => (StatusCode::NOT_FOUND, "SANDBOX_NOT_FOUND"),
                SandboxError::FileNotFound(_) => (StatusCode::NOT_FOUND, "FILE_NOT_FOUND"),
                SandboxError::PortExhausted(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "PORT_EXHAUSTED")
                }
                SandboxError::Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
                SandboxError::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR"),
                SandboxError::ImagePullFailure(_)
                | SandboxError::ContainerStartFailure(_)
                | SandboxError::ExecFailure { .. }
                | SandboxError::ReadinessTimeout { .. }
                | SandboxError::Cancelled(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "PROVISIONING_ERROR")
                }
            },
        }
    }

    /// Get user-friendly error message (sanitized for external consumption)
    pub fn to_user_message(&self) -> String {
        match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Sandbox(sandbox_error) => match sandbox_error {
                SandboxError::InvalidRequest(msg) => msg.clone(),
                SandboxError::InvalidPath(path) => format!("Invalid file path: {}", path),
                SandboxError::SandboxNotFound(_) => "Sandbox not found".to_string(),
                SandboxError::FileNotFound(path) => format!("File not found: {}", path),
                SandboxError::PortExhausted(_) => {
                    "No free port available, try again later".to_string()
                }
                SandboxError::Io { .. } => "Filesystem operation failed".to_string(),
                other => other.detail(),
            },
        }
    }

    /// Log the error under `request_id`; server-side failures at error level
    pub fn log(&self, request_id: &str) {
        let (status_code, error_code) = self.to_status_and_code();
        if status_code.is_server_error() {
            error!(
                request_id = %request_id,
                error = %self,
                "Sandbox request failed"
            );
        } else {
            warn!(
                request_id = %request_id,
                code = error_code,
                "Sandbox request rejected: {}",
                self
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status_code, error_code) = self.to_status_and_code();
        let user_message = self.to_user_message();

        // Details stay in the log, the client gets the sanitized message
        self.log(&request_id);

        let body = ErrorResponse {
            success: false,
            message: user_message,
            code: error_code,
            request_id,
        };

        (status_code, Json(body)).into_response()
    }
}

/// Result alias used by the HTTP handlers
pub type AppResult<T> = Result<T, AppError>;
