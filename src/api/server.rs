use std::future::Future;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::analytics::Sensitivity;
use crate::camera::SourceError;
use crate::session::{SessionController, SessionError, StartOutcome, StopOutcome};
use crate::storage::{FileIncidentStore, StoreError};

use super::stream::stream_handler;

const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;
/// Multipart field carrying the video.
const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub store: FileIncidentStore,
    pub list_limit: usize,
    pub uploads_dir: PathBuf,
}

#[derive(Deserialize)]
struct StartRequest {
    #[serde(default)]
    sensitivity: Sensitivity,
}

#[derive(Deserialize)]
struct UploadQuery {
    #[serde(default)]
    sensitivity: Sensitivity,
}

fn default_cleanup_days() -> u32 {
    7
}

#[derive(Deserialize)]
struct CleanupQuery {
    #[serde(default = "default_cleanup_days")]
    days: u32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/", get(root_handler))
        .route("/api/surveillance/status", get(status_handler))
        .route("/api/surveillance/start", post(start_handler))
        .route("/api/surveillance/stop", post(stop_handler))
        .route(
            "/api/surveillance/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/surveillance/stream", get(stream_handler))
        .route("/api/incidents", get(incidents_handler))
        .route("/api/incidents/{id}", delete(delete_incident_handler))
        .route("/api/incidents/{id}/image", get(incident_image_handler))
        .route("/api/incidents/old/cleanup", delete(cleanup_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(
    state: AppState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({ "message": "Smart Surveillance System API" }))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.status())
}

async fn start_handler(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> impl IntoResponse {
    let status = match state.controller.start(request.sensitivity).await {
        StartOutcome::Started => "started",
        StartOutcome::AlreadyActive => "already_active",
    };
    Json(json!({
        "status": status,
        "sensitivity": state.controller.sensitivity(),
    }))
}

async fn stop_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = match state.controller.stop().await {
        StopOutcome::Stopped => "stopped",
        StopOutcome::AlreadyIdle => "idle",
    };
    Json(json!({ "status": status }))
}

#[derive(Debug, Error)]
enum UploadError {
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Streams the first `file` field to `path`. `None` when the form has no such field.
async fn save_upload(multipart: &mut Multipart, path: &FsPath) -> Result<Option<u64>, UploadError> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = field.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        return Ok(Some(written));
    }
    Ok(None)
}

async fn discard_upload(path: &FsPath) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove upload"),
    }
}

async fn upload_handler(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Response {
    if let Err(e) = tokio::fs::create_dir_all(&state.uploads_dir).await {
        tracing::error!(error = %e, "failed to create uploads dir");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to store upload").into_response();
    }
    let path = state.uploads_dir.join(format!("upload_{}.bin", Uuid::new_v4()));

    let bytes = match save_upload(&mut multipart, &path).await {
        Ok(Some(bytes)) if bytes > 0 => bytes,
        Ok(Some(_)) => {
            discard_upload(&path).await;
            return (StatusCode::BAD_REQUEST, "empty upload").into_response();
        }
        Ok(None) => {
            return (StatusCode::BAD_REQUEST, "missing multipart field `file`").into_response();
        }
        Err(UploadError::Multipart(e)) => {
            discard_upload(&path).await;
            tracing::warn!(error = %e, "rejected malformed upload");
            return (StatusCode::BAD_REQUEST, e.body_text()).into_response();
        }
        Err(e @ UploadError::Io(_)) => {
            discard_upload(&path).await;
            tracing::error!(path = %path.display(), error = %e, "failed to write upload");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to store upload").into_response();
        }
    };

    tracing::info!(bytes, sensitivity = %query.sensitivity, "analysing uploaded clip");
    let result = state
        .controller
        .analyze_clip(path.clone(), query.sensitivity)
        .await;
    discard_upload(&path).await;

    match result {
        Ok(report) => Json(json!({
            "status": "processed",
            "incidents_detected": report.incidents_detected,
            "frames_processed": report.frames_processed,
        }))
        .into_response(),
        Err(SessionError::Source(SourceError::Unavailable(msg))) => {
            tracing::warn!(error = %msg, "uploaded clip could not be decoded");
            (StatusCode::UNPROCESSABLE_ENTITY, "could not decode video").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "clip analysis failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "clip analysis failed").into_response()
        }
    }
}

async fn incidents_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.list(state.list_limit))
}

async fn delete_incident_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.delete(id) {
        Ok(()) => Json(json!({ "status": "deleted" })).into_response(),
        Err(StoreError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "incident not found").into_response()
        }
        Err(e) => {
            tracing::error!(incident = %id, error = %e, "failed to delete incident");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to delete incident").into_response()
        }
    }
}

async fn cleanup_handler(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> impl IntoResponse {
    let deleted = state.store.cleanup_older_than(query.days);
    Json(json!({ "status": "cleaned", "deleted_count": deleted }))
}

async fn incident_image_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.image(id) {
        Ok(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Err(StoreError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "incident not found").into_response()
        }
        Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "image file not found").into_response()
        }
        Err(e) => {
            tracing::error!(incident = %id, error = %e, "failed to read incident image");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to read image").into_response()
        }
    }
}
