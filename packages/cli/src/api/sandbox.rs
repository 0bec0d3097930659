use std::collections::HashMap;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use previewbox_sandboxes::SandboxStatus;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct CreateSandboxRequest {
    pub files: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSandboxResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sbx_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyFilesRequest {
    pub files: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub success: bool,
    pub file: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub success: bool,
    pub files: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

/// Body of a rejected JSON payload becomes a 400
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn require_files(files: Option<HashMap<String, String>>) -> AppResult<HashMap<String, String>> {
    match files {
        Some(files) if !files.is_empty() => Ok(files),
        _ => Err(AppError::BadRequest("Files are required".to_string())),
    }
}

fn require_file_path(query: FileQuery) -> AppResult<String> {
    query
        .file_path
        .filter(|path| !path.is_empty())
        .ok_or_else(|| AppError::BadRequest("file and sandbox id is required".to_string()))
}

/// Status and sanitized message for an error, logged under a fresh request id
fn failure(err: AppError) -> (StatusCode, String) {
    err.log(&Uuid::new_v4().to_string());
    (err.to_status_and_code().0, err.to_user_message())
}

/// Materialize the submitted tree and start provisioning in the background
pub async fn create_sandbox(
    State(state): State<AppState>,
    payload: Result<Json<CreateSandboxRequest>, JsonRejection>,
) -> AppResult<Json<CreateSandboxResponse>> {
    let files = require_files(json_body(payload)?.files)?;

    let record = state.manager.create(files).await?;
    info!("Sandbox {} accepted, provisioning on port {}", record.id, record.port);

    Ok(Json(CreateSandboxResponse {
        success: true,
        message: "Sandbox created, provisioning started".to_string(),
        sbx_id: Some(record.id),
    }))
}

pub async fn get_status(
    Path(sbx_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let status = state.manager.status(&sbx_id).await;

    let message = match &status {
        SandboxStatus::Progress => "Server not ready".to_string(),
        SandboxStatus::Completed { .. } => "server started successfully".to_string(),
        SandboxStatus::Failed { message } => message.clone(),
        SandboxStatus::NotFound => "Sandbox not found".to_string(),
    };
    let code = match status {
        SandboxStatus::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };

    let body = StatusResponse {
        status: status.as_str(),
        server_url: status.server_url().map(str::to_string),
        message: Some(message),
    };
    (code, Json(body)).into_response()
}

pub async fn get_file(
    Path(sbx_id): Path<String>,
    Query(query): Query<FileQuery>,
    State(state): State<AppState>,
) -> Response {
    let result = match require_file_path(query) {
        Ok(file_path) => state
            .manager
            .read_file(&sbx_id, &file_path)
            .await
            .map_err(AppError::from),
        Err(e) => Err(e),
    };

    match result {
        Ok(content) => Json(FileResponse {
            success: true,
            file: Some(content),
            message: "File get successfully".to_string(),
        })
        .into_response(),
        Err(e) => {
            let (code, message) = failure(e);
            let body = FileResponse {
                success: false,
                file: None,
                message,
            };
            (code, Json(body)).into_response()
        }
    }
}

/// Overwrite an existing file; the parent directory must already exist
pub async fn update_file(
    Path(sbx_id): Path<String>,
    Query(query): Query<FileQuery>,
    State(state): State<AppState>,
    payload: Result<Json<UpdateFileRequest>, JsonRejection>,
) -> AppResult<Json<MessageResponse>> {
    let file_path = require_file_path(query)?;
    let content = json_body(payload)?
        .content
        .ok_or_else(|| AppError::BadRequest("content is required".to_string()))?;

    state
        .manager
        .write_file(&sbx_id, &file_path, &content)
        .await?;
    info!("Updated {} in sandbox {}", file_path, sbx_id);

    Ok(MessageResponse::ok("file updated successfully"))
}

pub async fn list_files(Path(sbx_id): Path<String>, State(state): State<AppState>) -> Response {
    match state.manager.list_files(&sbx_id).await {
        Ok(files) => Json(FilesResponse {
            success: true,
            files: Some(files),
            message: None,
        })
        .into_response(),
        Err(e) => {
            let (code, message) = failure(e.into());
            let body = FilesResponse {
                success: false,
                files: None,
                message: Some(message),
            };
            (code, Json(body)).into_response()
        }
    }
}

/// Create or overwrite several files at once, creating directories as needed
pub async fn apply_files(
    Path(sbx_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<ApplyFilesRequest>, JsonRejection>,
) -> AppResult<Json<MessageResponse>> {
    let files = require_files(json_body(payload)?.files)?;

    let written = state.manager.apply_files(&sbx_id, &files).await?;
    info!("Applied {} files to sandbox {}", written, sbx_id);

    Ok(MessageResponse::ok(format!("{} files updated successfully", written)))
}

pub async fn delete_sandbox(
    Path(sbx_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<MessageResponse>> {
    state.manager.teardown(&sbx_id).await?;
    info!("Sandbox {} deleted on request", sbx_id);

    Ok(MessageResponse::ok("Sandbox deleted successfully"))
}
