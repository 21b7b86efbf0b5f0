use super::state::AppState;
use crate::catalog::{NewStream, StreamMetadata};
use crate::error::StreamError;
use crate::session::SessionInfo;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::path::Path as FsPath;
use tracing::{error, info, warn};

const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteStreamResponse {
    pub id: String,
    pub message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn stream_error_status(err: &StreamError) -> StatusCode {
    match err {
        StreamError::NotFound(_) => StatusCode::NOT_FOUND,
        StreamError::Invalidated(_) => StatusCode::SERVICE_UNAVAILABLE,
        StreamError::StartupTimeout { .. }
        | StreamError::ProcessFailure { .. }
        | StreamError::Catalog(_)
        | StreamError::Spawn { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn catalog_failure(e: anyhow::Error) -> Response {
    error!("Catalog operation failed: {:#}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Catalog operation failed")
}

/// Segment names are produced by the muxer: one plain `.ts` file name, no directories
fn is_segment_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && name.ends_with(".ts")
}

async fn resolve_slug(state: &AppState, slug: &str) -> Result<StreamMetadata, Response> {
    match state.catalog.get_stream_by_slug(slug).await {
        Ok(Some(stream)) => Ok(stream),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Stream {} not found", slug),
        )),
        Err(e) => Err(catalog_failure(e)),
    }
}

async fn file_response(path: &FsPath, content_type: &'static str) -> Response {
    match tokio::fs::read(path).await {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error_response(StatusCode::NOT_FOUND, "File not found")
        }
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file")
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /stream/:slug/:file
/// Serve the live manifest (cold-starting the session if needed) or one of its segments
pub async fn get_stream_file(
    State(state): State<AppState>,
    Path((slug, file)): Path<(String, String)>,
) -> impl IntoResponse {
    if file == state.sessions.config().manifest_name {
        return get_manifest(&state, &slug).await;
    }

    if !is_segment_name(&file) {
        return error_response(StatusCode::BAD_REQUEST, format!("Invalid file name {}", file));
    }

    let stream = match resolve_slug(&state, &slug).await {
        Ok(stream) => stream,
        Err(response) => return response,
    };

    match state.sessions.touch(&stream.id) {
        Some(dir) => file_response(&dir.join(&file), SEGMENT_CONTENT_TYPE).await,
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Stream {} is not live", slug),
        ),
    }
}

async fn get_manifest(state: &AppState, slug: &str) -> Response {
    let stream = match resolve_slug(state, slug).await {
        Ok(stream) => stream,
        Err(response) => return response,
    };

    match state.sessions.ensure_ready(&stream.id).await {
        Ok(manifest) => file_response(&manifest, MANIFEST_CONTENT_TYPE).await,
        Err(e) => {
            warn!("Manifest for stream {} unavailable: {}", slug, e);
            error_response(stream_error_status(&e), e.to_string())
        }
    }
}

/// GET /api/streams
pub async fn list_streams(State(state): State<AppState>) -> impl IntoResponse {
    match state.catalog.list_streams().await {
        Ok(streams) => (StatusCode::OK, Json(streams)).into_response(),
        Err(e) => catalog_failure(e),
    }
}

/// POST /api/streams
pub async fn create_stream(
    State(state): State<AppState>,
    Json(req): Json<NewStream>,
) -> impl IntoResponse {
    if let Err(e) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    match state.catalog.create_stream(req).await {
        Ok(stream) => (StatusCode::CREATED, Json(stream)).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// GET /api/streams/:id
pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.catalog.get_stream_by_id(&id).await {
        Ok(Some(stream)) => (StatusCode::OK, Json(stream)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Stream {} not found", id)),
        Err(e) => catalog_failure(e),
    }
}

/// PUT /api/streams/:id
/// Update sources; the live session (if any) is torn down before responding
pub async fn update_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<NewStream>,
) -> impl IntoResponse {
    if let Err(e) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    match state.catalog.update_stream(&id, req).await {
        Ok(Some(stream)) => {
            state.sessions.invalidate(&id).await;
            info!("Updated stream {}", id);
            (StatusCode::OK, Json(stream)).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Stream {} not found", id)),
        Err(e) => catalog_failure(e),
    }
}

/// DELETE /api/streams/:id
pub async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.catalog.delete_stream(&id).await {
        Ok(true) => {
            state.sessions.invalidate(&id).await;
            info!("Deleted stream {}", id);
            (
                StatusCode::OK,
                Json(DeleteStreamResponse {
                    id: id.clone(),
                    message: format!("Stream {} deleted", id),
                }),
            )
                .into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Stream {} not found", id)),
        Err(e) => catalog_failure(e),
    }
}

/// GET /api/sessions
/// Live transcoding sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<SessionInfo> = state.sessions.sessions();
    (StatusCode::OK, Json(sessions))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
