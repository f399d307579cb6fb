use axum::Json;
use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::io;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use super::AppState;
use super::auth::AuthUser;
use super::naming;
use crate::error::BackupError;
use crate::types::{ErrorResponse, ListResponse, MessageResponse, UploadResponse};

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound,
    BadRequest(String),
    Multipart(MultipartError),
    Internal(BackupError),
}

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        ApiError::Internal(err)
    }
}

impl From<io::Error> for ApiError {
    fn from(err: io::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<tempfile::PersistError> for ApiError {
    fn from(err: tempfile::PersistError) -> Self {
        ApiError::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Unauthorized => {
                let body = ErrorResponse {
                    detail: "Incorrect username or password".to_string(),
                };
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Basic")],
                    Json(body),
                )
                    .into_response();
            }
            ApiError::NotFound => (StatusCode::NOT_FOUND, "File not found".to_string()),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Multipart(err) => (err.status(), err.body_text()),
            ApiError::Internal(err) => {
                error!(error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}

/// Path of a stored backup, or NotFound for names outside the served set
fn stored_path(state: &AppState, name: &str) -> Result<PathBuf, ApiError> {
    if !naming::is_backup_name(name, &state.config.backup_prefix) {
        return Err(ApiError::NotFound);
    }
    Ok(state.config.server_backup_dir.join(name))
}

/// Open a stored backup that is a regular file
async fn open_stored(path: &std::path::Path) -> Result<(tokio::fs::File, u64), ApiError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(ApiError::NotFound);
    }
    Ok((file, meta.len()))
}

/// `POST /upload`: multipart `file` plus optional `client_timestamp` (Unix seconds)
pub async fn upload(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let dir = &state.config.server_backup_dir;
    tokio::fs::create_dir_all(dir).await?;

    // The file is staged under a hidden name because client_timestamp may
    // arrive after it and the final name depends on it
    let mut staged = None;
    let mut client_timestamp = None;

    while let Some(mut field) = multipart.next_field().await.map_err(ApiError::Multipart)? {
        match field.name() {
            Some("file") => {
                let original = field.file_name().unwrap_or("upload").to_string();
                let partial = tempfile::Builder::new().prefix(".upload-").tempfile_in(dir)?;
                let mut out = tokio::fs::File::from_std(partial.reopen()?);

                let mut bytes: u64 = 0;
                while let Some(chunk) = field.chunk().await.map_err(ApiError::Multipart)? {
                    out.write_all(&chunk).await?;
                    bytes += chunk.len() as u64;
                }
                out.flush().await?;
                out.sync_all().await?;
                staged = Some((partial, original, bytes));
            }
            Some("client_timestamp") => {
                let text = field.text().await.map_err(ApiError::Multipart)?;
                let text = text.trim();
                if !text.is_empty() {
                    let ts = text.parse::<i64>().map_err(|_| {
                        warn!(user = %username, value = %text, "Rejected client_timestamp");
                        ApiError::BadRequest(format!("Invalid Unix timestamp: {}", text))
                    })?;
                    client_timestamp = Some(ts);
                }
            }
            _ => {}
        }
    }

    let Some((partial, original, bytes)) = staged else {
        return Err(ApiError::BadRequest("Missing multipart field 'file'".to_string()));
    };

    let name = naming::backup_name(
        &state.config.backup_name_format,
        &username,
        client_timestamp,
        Utc::now(),
    )
    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let target = dir.join(&name);

    if target.exists() {
        warn!(path = %target.display(), user = %username, "Overwriting existing backup");
    }
    partial.persist(&target)?;

    info!(
        original = %original,
        path = %target.display(),
        user = %username,
        bytes,
        "Backup uploaded"
    );
    Ok(Json(UploadResponse {
        message: "Backup uploaded successfully".to_string(),
        path: target.display().to_string(),
    }))
}

/// `GET /list`: live directory listing, prefix-filtered and sorted
pub async fn list(State(state): State<AppState>, _user: AuthUser) -> Result<Json<ListResponse>, ApiError> {
    let mut entries = match tokio::fs::read_dir(&state.config.server_backup_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Json(ListResponse::default())),
        Err(e) => return Err(e.into()),
    };

    let mut backups = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if naming::is_backup_name(name, &state.config.backup_prefix) {
                backups.push(name.to_string());
            }
        }
    }
    backups.sort();

    Ok(Json(ListResponse { backups }))
}

/// `GET /download/{name}`: streams the file
pub async fn download(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let path = stored_path(&state, &name)?;
    let (file, len) = open_stored(&path).await?;

    info!(name = %name, user = %username, bytes = len, "Serving backup");
    let disposition = format!("attachment; filename=\"{}\"", name.replace('"', ""));
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, len.to_string()),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// `DELETE /delete/{name}`
pub async fn delete(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let path = stored_path(&state, &name)?;
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Err(ApiError::NotFound),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(e) => return Err(e.into()),
    }

    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        // Lost a race with another delete
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(e) => return Err(e.into()),
    }

    info!(name = %name, user = %username, "Backup deleted");
    Ok(Json(MessageResponse {
        message: "Backup deleted successfully".to_string(),
    }))
}
