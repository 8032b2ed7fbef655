//! # poco-relay
//!
//! Local web server for the Poco agent UI.
//!
//! This server provides:
//! - Render-ready conversation turns built from the backend's message log
//! - A clean, sorted workspace file tree built from the backend's file listing
//! - Document viewers that load workspace file content, one fetch per panel
//! - SSE streaming of viewer updates
//! - A same-origin reverse proxy for the backend's `/api/v1` API
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────────┐
//! │  Frontend   │────▶│  Axum HTTP   │────▶│  Agent backend  │
//! │  (static/)  │     │  Server      │     │  /api/v1/...    │
//! └─────────────┘     └──────────────┘     └─────────────────┘
//!       │ SSE               │
//!       ▼                   ▼
//! ┌─────────────┐     ┌──────────────────────────────┐
//! │  Viewer     │     │ normalizer.rs  workspace.rs  │
//! │  updates    │     │ (turns)        (file tree)   │
//! └─────────────┘     └──────────────────────────────┘
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Server health check
//! - `GET /api/stream` - SSE event stream
//! - `GET /api/sessions/{id}` - Execution session summary
//! - `GET /api/sessions/{id}/turns` - Normalized conversation turns
//! - `GET /api/sessions/{id}/files` - Workspace file tree
//! - `GET /api/sessions/{id}/file-url?path=` - Link to one workspace file
//! - `GET|DELETE /api/viewers/{id}`, `POST /api/viewers/{id}/open|refetch` - Document viewers
//! - `ANY /api/v1/*` - Reverse proxy to the backend

mod backend;
mod chat;
mod config;
mod error;
mod normalizer;
mod proxy;
mod sessions;
#[cfg(test)]
mod testing;
mod viewer;
mod workspace;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::HeaderMap,
    response::{sse::{Event, KeepAlive, Sse}, Json},
    routing::{any, get, post},
    Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backend::{BackendClient, WorkspaceUrls};
use crate::config::Config;
use crate::normalizer::ConversationTurn;
use crate::sessions::ExecutionSession;
use crate::viewer::{ViewerRegistry, ViewerSource, ViewerState};
use crate::workspace::FileRecord;

// ============================================================================
// SSE Event Types
// ============================================================================

/// Server-Sent Events that are broadcast to connected clients.
///
/// Events are tagged with their type in the JSON serialization to allow
/// the frontend to dispatch them appropriately.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum SseEvent {
    #[serde(rename = "heartbeat")]
    Heartbeat { timestamp: i64 },
    #[serde(rename = "status")]
    Status { status: String, details: Option<String> },
    #[serde(rename = "viewer")]
    Viewer { viewer_id: String, state: ViewerState },
}

impl SseEvent {
    fn name(&self) -> &'static str {
        match self {
            SseEvent::Heartbeat { .. } => "heartbeat",
            SseEvent::Status { .. } => "status",
            SseEvent::Viewer { .. } => "viewer",
        }
    }

    fn to_event(&self, seq: u64) -> Event {
        Event::default()
            .event(self.name())
            .id(seq.to_string())
            .data(serde_json::to_string(self).unwrap_or_default())
    }
}

// ============================================================================
// App State - Shared state across all request handlers
// ============================================================================

/// Global application state shared across all HTTP handlers.
/// Wrapped in Arc<> for thread-safe sharing.
pub struct AppState {
    start_time: Instant,                           // Server start time for uptime tracking
    event_tx: broadcast::Sender<(u64, SseEvent)>,  // SSE broadcast channel
    seq: std::sync::atomic::AtomicU64,             // Monotonic event sequence number
    config: Config,
    backend: BackendClient,                        // JSON API client (timeouts, envelope unwrapping)
    proxy_http: reqwest::Client,                   // Raw client for the proxy; never follows redirects
    urls: WorkspaceUrls,                           // Builds workspace file links
    viewers: Arc<ViewerRegistry>,                  // Open document viewers
}

impl AppState {
    fn new(config: Config) -> Result<Arc<Self>, reqwest::Error> {
        let (event_tx, _) = broadcast::channel::<(u64, SseEvent)>(100);
        let backend = BackendClient::new(&config.backend_url, config.upstream_timeout)?;
        let proxy_http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let viewers = ViewerRegistry::new(backend.http().clone(), backend.base_url());

        Ok(Arc::new(Self {
            start_time: Instant::now(),
            event_tx,
            seq: std::sync::atomic::AtomicU64::new(1),
            urls: WorkspaceUrls::new(&config.public_api_url),
            config,
            backend,
            proxy_http,
            viewers,
        }))
    }

    /// Get next sequence number for SSE events (ensures ordering)
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Broadcast an event to all connected SSE clients
    fn broadcast(&self, event: SseEvent) {
        let seq = self.next_seq();
        let _ = self.event_tx.send((seq, event)); // Ignore error if no subscribers
    }
}

// ============================================================================
// Health Endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    version: &'static str,
    open_viewers: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        open_viewers: state.viewers.open_count(),
    })
}

// ============================================================================
// SSE Stream Endpoint
// ============================================================================

#[derive(Deserialize, Default)]
struct StreamQuery {
    #[serde(default)]
    last_event_id: Option<u64>,
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let last_id = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .or(query.last_event_id);

    if let Some(id) = last_id {
        tracing::info!("Client reconnecting from event ID: {}", id);
    }

    let rx = state.event_tx.subscribe();

    let broadcast_stream = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok((seq, event)) => return Some((Ok(event.to_event(seq)), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("SSE client lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    // Send initial connection event
    let init_seq = state.next_seq();
    let init_event = stream::once(async move {
        let event = SseEvent::Status {
            status: "connected".to_string(),
            details: Some(format!("seq: {}", init_seq)),
        };
        Ok(event.to_event(init_seq))
    });

    Sse::new(init_event.chain(broadcast_stream)).keep_alive(KeepAlive::default())
}

// ============================================================================
// Session Endpoints
// ============================================================================

#[derive(Deserialize, Default)]
struct SessionQuery {
    #[serde(default)]
    progress: Option<u32>,
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Json<ExecutionSession> {
    Json(chat::load_session(&state.backend, &session_id, query.progress.unwrap_or(0)).await)
}

async fn get_turns(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<Vec<ConversationTurn>> {
    Json(chat::load_turns(&state.backend, &session_id).await)
}

async fn get_files(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<Vec<FileRecord>> {
    Json(chat::load_files(&state.backend, &state.urls, &session_id).await)
}

#[derive(Deserialize)]
struct FileUrlQuery {
    path: String,
}

#[derive(Serialize)]
struct FileUrlResponse {
    url: String,
}

async fn get_file_url(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<FileUrlQuery>,
) -> Json<FileUrlResponse> {
    Json(FileUrlResponse {
        url: state.urls.file_url(&session_id, &query.path),
    })
}

// ============================================================================
// Document Viewer Endpoints
// ============================================================================

async fn viewer_state(
    State(state): State<Arc<AppState>>,
    Path(viewer_id): Path<String>,
) -> Json<ViewerState> {
    Json(state.viewers.state(&viewer_id).await)
}

async fn viewer_open(
    State(state): State<Arc<AppState>>,
    Path(viewer_id): Path<String>,
    Json(source): Json<ViewerSource>,
) -> Json<ViewerState> {
    Json(state.viewers.open(&viewer_id, source).await)
}

async fn viewer_refetch(
    State(state): State<Arc<AppState>>,
    Path(viewer_id): Path<String>,
) -> Json<ViewerState> {
    Json(state.viewers.refetch(&viewer_id).await)
}

async fn viewer_close(
    State(state): State<Arc<AppState>>,
    Path(viewer_id): Path<String>,
) -> Json<ViewerState> {
    state.viewers.close(&viewer_id).await;
    Json(ViewerState::Idle)
}

// ============================================================================
// Router
// ============================================================================

fn router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();
    Router::new()
        // Health
        .route("/health", get(health))
        // SSE
        .route("/api/stream", get(stream_events))
        // Sessions
        .route("/api/sessions/{session_id}", get(get_session))
        .route("/api/sessions/{session_id}/turns", get(get_turns))
        .route("/api/sessions/{session_id}/files", get(get_files))
        .route("/api/sessions/{session_id}/file-url", get(get_file_url))
        // Document viewers
        .route("/api/viewers/{viewer_id}", get(viewer_state).delete(viewer_close))
        .route("/api/viewers/{viewer_id}/open", post(viewer_open))
        .route("/api/viewers/{viewer_id}/refetch", post(viewer_refetch))
        // Backend proxy (10MB body limit)
        .route("/api/v1/{*path}", any(proxy::proxy_request))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        // Static files
        .fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("poco_relay=info".parse()?)
            .add_directive("tower_http=info".parse()?))
        .init();

    let config = Config::from_env();
    tracing::info!("Backend: {}", config.backend_url);
    let state = AppState::new(config)?;

    // Forward viewer updates to SSE clients
    let forward_state = state.clone();
    let mut viewer_rx = state.viewers.subscribe();
    tokio::spawn(async move {
        loop {
            match viewer_rx.recv().await {
                Ok(update) => forward_state.broadcast(SseEvent::Viewer {
                    viewer_id: update.viewer_id,
                    state: update.state,
                }),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Viewer forwarder lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Spawn heartbeat broadcaster
    let heartbeat_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(15)).await;
            heartbeat_state.broadcast(SseEvent::Heartbeat {
                timestamp: chrono::Utc::now().timestamp(),
            });
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let app = router(state);
    tracing::info!("poco-relay v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
