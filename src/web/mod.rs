// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Web UI and HTTP API for uploading, processing and downloading batches

mod page;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, FailurePolicy};
use crate::pipeline::Pipeline;
use crate::progress::{ProgressState, WatchProgress};
use crate::session::{ingest_uploads, IngestSummary, SessionStatus, SessionStore};
use crate::workspace::{prepare_upload, IngestOptions, Workspace};
use crate::{PixsortError, Result};

/// Shared application state
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Arc<Pipeline>,
    pub sessions: Arc<SessionStore>,
    pub ingest: IngestOptions,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: Arc<Pipeline>) -> Self {
        let ingest = IngestOptions::from_rules(&config.rules);
        Self {
            config,
            pipeline,
            sessions: Arc::new(SessionStore::new()),
            ingest,
        }
    }
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.web.max_upload_mb.saturating_mul(1024 * 1024);

    Router::new()
        // Pages
        .route("/", get(index_page))
        // API endpoints
        .route("/api/status", get(api_status))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/files", post(upload_files))
        .route("/api/sessions/:id/process", post(process_session))
        .route("/api/sessions/:id/cancel", post(cancel_session))
        .route("/api/sessions/:id/reset", post(reset_session))
        .route("/api/sessions/:id/download", get(download_archive))
        .route("/api/sessions/:id/progress", get(progress_socket))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for PixsortError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            PixsortError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PixsortError::InvalidState(_) | PixsortError::Cancelled => (StatusCode::CONFLICT, "CONFLICT"),
            PixsortError::EmptyBatch => (StatusCode::BAD_REQUEST, "EMPTY_BATCH"),
            PixsortError::Upload(_) => (StatusCode::BAD_REQUEST, "BAD_UPLOAD"),
            PixsortError::UnreadableInput { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "UNREADABLE_INPUT"),
            PixsortError::OllamaUnavailable(_) | PixsortError::Api(_) => {
                (StatusCode::BAD_GATEWAY, "CLASSIFIER_UNAVAILABLE")
            }
            PixsortError::Archive(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ARCHIVE_ERROR"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

// === Page Handlers ===

async fn index_page(State(state): State<Arc<AppState>>) -> Result<Html<String>> {
    Ok(Html(page::render_index(&state.config)?))
}

// === API Handlers ===

#[derive(Serialize)]
struct ClassifierStatus {
    backend: &'static str,
    model: String,
    labels: Vec<String>,
    on_failure: FailurePolicy,
    archive_name: String,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    sessions: usize,
}

async fn api_status(State(state): State<Arc<AppState>>) -> Json<ClassifierStatus> {
    let classifier = state.pipeline.classifier();
    let options = state.pipeline.options();
    let health = classifier.health_check().await;

    Json(ClassifierStatus {
        backend: classifier.name(),
        model: state.config.classifier.model.clone(),
        labels: state.config.classifier.labels.clone(),
        on_failure: options.on_failure,
        archive_name: options.archive_name.clone(),
        healthy: health.is_ok(),
        error: health.err().map(|e| e.to_string()),
        sessions: state.sessions.len().await,
    })
}

async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let id = state.sessions.create().await;
    (StatusCode::CREATED, Json(json!({ "id": id })))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStatus>> {
    Ok(Json(state.sessions.status(id).await?))
}

async fn upload_files(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Response> {
    // Fail fast before reading the body
    state.sessions.status(id).await?;

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PixsortError::Upload(e.to_string()))?
    {
        let Some(name) = field.file_name().map(String::from) else {
            debug!("Ignoring non-file form field {:?}", field.name());
            continue;
        };
        let data = field.bytes().await.map_err(|e| PixsortError::Upload(e.to_string()))?;
        if name.is_empty() && data.is_empty() {
            continue;
        }
        files.push((name, data));
    }

    if files.is_empty() {
        return Err(PixsortError::Upload("no files in request".to_string()));
    }

    let workspace = state.sessions.with_session(id, |s| s.begin_upload()).await?;

    // Decoding and disk writes happen outside the store lock
    let opts = state.ingest.clone();
    let ingested = tokio::task::spawn_blocking(move || -> Result<(Workspace, IngestSummary)> {
        let workspace = match workspace {
            Some(ws) => ws,
            None => Workspace::create()?,
        };
        let prepared = files
            .into_iter()
            .map(|(name, data)| {
                let upload = prepare_upload(&name, &data, &opts);
                (name, upload)
            })
            .collect();
        let summary = ingest_uploads(&workspace, prepared)?;
        Ok((workspace, summary))
    })
    .await
    .map_err(|e| PixsortError::Upload(format!("upload task failed: {}", e)))
    .and_then(|result| result);

    let summary = match ingested {
        Ok((workspace, summary)) => {
            state
                .sessions
                .with_session(id, move |s| s.finish_upload(workspace, summary))
                .await?
        }
        Err(e) => {
            let reason = e.to_string();
            state
                .sessions
                .with_session(id, |s| {
                    s.abandon_upload(&reason);
                    Ok(())
                })
                .await?;
            return Err(e);
        }
    };

    let status = if summary.accepted.is_empty() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };
    Ok((status, Json(summary)).into_response())
}

async fn process_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let (workspace, cancel, progress_tx) = state
        .sessions
        .with_session(id, |s| {
            let (workspace, cancel) = s.begin_processing()?;
            Ok((workspace, cancel, s.progress_sender()))
        })
        .await?;

    let pipeline = Arc::clone(&state.pipeline);
    let sessions = Arc::clone(&state.sessions);

    tokio::spawn(async move {
        let progress = WatchProgress::new(progress_tx);
        let outcome = pipeline.run(workspace, &progress, &cancel).await;
        if let Err(e) = &outcome {
            warn!("Session {}: batch failed: {}", id, e);
        }

        let recorded = sessions
            .with_session(id, |s| {
                s.complete(outcome);
                Ok(())
            })
            .await;
        if recorded.is_err() {
            // Session expired mid-run; still release any waiting socket
            progress.finish();
        }
    });

    Ok((StatusCode::ACCEPTED, Json(state.sessions.status(id).await?)))
}

async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStatus>> {
    state.sessions.with_session(id, |s| s.cancel()).await?;
    info!("Session {}: cancellation requested", id);
    Ok(Json(state.sessions.status(id).await?))
}

async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStatus>> {
    state.sessions.with_session(id, |s| s.reset()).await?;
    Ok(Json(state.sessions.status(id).await?))
}

async fn download_archive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let archive = state.sessions.with_session(id, |s| s.take_download()).await?;
    info!("Session {}: serving {} ({} bytes)", id, archive.file_name, archive.len());

    let disposition = format!("attachment; filename=\"{}\"", archive.file_name);
    let bytes = Arc::try_unwrap(archive)
        .map(|a| a.bytes)
        .unwrap_or_else(|shared| shared.bytes.clone());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, crate::archive::Archive::MIME_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn progress_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let rx = state.sessions.subscribe(id).await?;
    Ok(ws.on_upgrade(move |socket| stream_progress(socket, rx)))
}

/// Push every progress change until the run finishes
async fn stream_progress(mut socket: WebSocket, mut rx: watch::Receiver<ProgressState>) {
    let mut current = *rx.borrow_and_update();

    loop {
        let Ok(text) = serde_json::to_string(&current) else {
            break;
        };
        if socket.send(Message::Text(text)).await.is_err() {
            debug!("Progress socket closed by client");
            return;
        }
        if current.finished || rx.changed().await.is_err() {
            break;
        }
        current = *rx.borrow_and_update();
    }

    let _ = socket.send(Message::Close(None)).await;
}

/// Resolve on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Periodically drop idle sessions and their temporary storage
fn spawn_session_reaper(sessions: Arc<SessionStore>, ttl_secs: u64) {
    let ttl = chrono::Duration::seconds(
        i64::try_from(ttl_secs).unwrap_or(i64::MAX).min(i64::MAX / 1000),
    );
    let period = Duration::from_secs(ttl_secs.clamp(1, 60));

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            sessions.remove_expired(ttl).await;
        }
    });
}

/// Start the web server
pub async fn start_server(config: AppConfig, pipeline: Arc<Pipeline>) -> Result<()> {
    let addr = format!("{}:{}", config.web.host, config.web.port);
    let ttl_secs = config.web.session_ttl_secs;

    let state = Arc::new(AppState::new(config, pipeline));
    spawn_session_reaper(Arc::clone(&state.sessions), ttl_secs);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Web UI available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| PixsortError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
