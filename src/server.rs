// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP surface: landing page, playlist and chunk files.
//!
//! Endpoints:
//!   GET /                      → landing page with a player for the playlist
//!   GET /{playlist}            → playlist text (application/x-mpegURL)
//!   GET /{segments}/{file}.ts  → chunk bytes (video/MP2T), Range supported
//!   GET /status                → publish state (JSON)

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Result, SegError};
use crate::orchestrator::{SharedState, Stage};
use crate::playlist::PLAYLIST_CONTENT_TYPE;

/// MIME type chunk files are served with.
pub const CHUNK_CONTENT_TYPE: &str = "video/MP2T";

const DEFAULT_INDEX: &str = include_str!("../templates/index.html");
const PLAYLIST_PLACEHOLDER: &str = "{{playlist}}";

/// Shared state passed to all handlers.
pub struct AppState {
    pub publish: SharedState,
    /// File name the playlist is served under, without the leading slash.
    pub playlist_name: String,
    /// URL prefix of the chunk directory, without slashes.
    pub segments_prefix: String,
    pub segments_dir: PathBuf,
    pub index_template: Option<PathBuf>,
}

impl AppState {
    /// Build handler state from a validated [`Config`].
    ///
    /// Names that would not survive as route paths are rejected here rather
    /// than when the router is built.
    pub fn from_config(config: &Config, publish: SharedState) -> Result<Self> {
        config.validate()?;
        let playlist_name = config
            .playlist
            .file_name()
            .ok_or_else(|| SegError::Config("playlist.path has no file name".into()))?;
        let segments_prefix = config
            .segments
            .url_prefix()
            .ok_or_else(|| SegError::Config("segments.dir has no directory name".into()))?;
        Ok(Self {
            publish,
            playlist_name: playlist_name.to_string(),
            segments_prefix: segments_prefix.to_string(),
            segments_dir: config.segments.dir.clone(),
            index_template: config.http.index_template.clone(),
        })
    }

    pub fn playlist_url(&self) -> String {
        format!("/{}", self.playlist_name)
    }
}

#[derive(Serialize)]
struct StatusResponse {
    stage: String,
    error: Option<String>,
    chunks: usize,
    total_duration_secs: f64,
    playlist: Option<String>,
    started_at: DateTime<Utc>,
}

// ──────────────── router ──────────────────────────────────────────────────

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let chunks = Router::new()
        .fallback_service(ServeDir::new(&state.segments_dir))
        .layer(middleware::map_response(set_chunk_content_type));

    Router::new()
        .route("/", get(handle_index))
        .route(&state.playlist_url(), get(handle_playlist))
        .route("/status", get(handle_status))
        .nest_service(&format!("/{}", state.segments_prefix), chunks)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listening socket.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| SegError::Serve(format!("cannot bind {addr}: {e}")))
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().map_err(|e| SegError::Serve(e.to_string()))?;
    info!(addr = %addr, "HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server error");
            SegError::Serve(e.to_string())
        })
}

// ──────────────── handlers ────────────────────────────────────────────────

async fn handle_index(State(state): State<Arc<AppState>>) -> Response {
    let template = match &state.index_template {
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) => {
                error!(template = ?path, error = %e, "Cannot read index template");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(CONTENT_TYPE, "text/plain; charset=utf-8")],
                    format!("Cannot read index template: {e}"),
                )
                    .into_response();
            }
        },
        None => DEFAULT_INDEX.to_string(),
    };

    Html(template.replace(PLAYLIST_PLACEHOLDER, &escape_html(&state.playlist_url()))).into_response()
}

async fn handle_playlist(State(state): State<Arc<AppState>>) -> Response {
    let publish = state.publish.read();
    match (&publish.stage, &publish.playlist) {
        (Stage::Serving, Some(text)) => (
            StatusCode::OK,
            [(CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)],
            text.clone(),
        )
            .into_response(),
        (Stage::Failed(reason), _) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("Playlist could not be built: {reason}"),
        )
            .into_response(),
        (stage, _) => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("Playlist is not available ({})", stage.name()),
        )
            .into_response(),
    }
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let publish = state.publish.read();
    let error = match &publish.stage {
        Stage::Failed(reason) => Some(reason.clone()),
        _ => None,
    };
    axum::Json(StatusResponse {
        stage: publish.stage.name().to_string(),
        error,
        chunks: publish.chunks,
        total_duration_secs: publish.total_duration_secs,
        playlist: (publish.stage == Stage::Serving && publish.playlist.is_some())
            .then(|| state.playlist_url()),
        started_at: publish.started_at,
    })
}

/// Chunk responses carry the transport stream type regardless of what the
/// file service guessed from the extension.
async fn set_chunk_content_type(mut res: Response) -> Response {
    if res.status().is_success() {
        res.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(CHUNK_CONTENT_TYPE));
    }
    res
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
