//! Document viewers - show the text of one workspace file per panel.
//!
//! Each viewer has at most one content fetch in flight. Opening another file
//! aborts the previous fetch and bumps the viewer's generation; a fetch that
//! completes under an older generation is discarded, so a slow or cancelled
//! request can never overwrite a newer result.

use crate::workspace::FileRecord;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewerErrorCode {
    /// Neither a fallback URL nor a file URL to fetch.
    NoSource,
    FetchError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ViewerState {
    Idle,
    Loading,
    Success {
        content: String,
    },
    Error {
        code: ViewerErrorCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// What a viewer was asked to show.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewerSource {
    #[serde(default)]
    pub file: Option<FileRecord>,
    /// Takes precedence over the file's own `url`.
    #[serde(default)]
    pub fallback_url: Option<String>,
}

impl ViewerSource {
    fn url(&self) -> Option<&str> {
        self.fallback_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| {
                self.file
                    .as_ref()
                    .and_then(|f| f.url.as_deref())
                    .filter(|u| !u.is_empty())
            })
    }
}

/// Broadcast on every viewer state change.
#[derive(Debug, Clone, Serialize)]
pub struct ViewerUpdate {
    pub viewer_id: String,
    pub state: ViewerState,
}

struct Slot {
    generation: u64,
    source: Option<ViewerSource>,
    state: ViewerState,
    task: Option<AbortHandle>,
}

pub struct Viewer {
    id: String,
    http: reqwest::Client,
    /// Origin that same-origin links (`/api/v1/...`) are fetched from.
    base_url: String,
    events: broadcast::Sender<ViewerUpdate>,
    slot: Mutex<Slot>,
}

impl Viewer {
    fn new(id: &str, http: reqwest::Client, base_url: &str, events: broadcast::Sender<ViewerUpdate>) -> Self {
        Self {
            id: id.to_string(),
            http,
            base_url: base_url.to_string(),
            events,
            slot: Mutex::new(Slot {
                generation: 0,
                source: None,
                state: ViewerState::Idle,
                task: None,
            }),
        }
    }

    pub async fn state(&self) -> ViewerState {
        self.slot.lock().await.state.clone()
    }

    /// Show `source`, superseding whatever was loading before.
    pub async fn open(self: &Arc<Self>, source: Option<ViewerSource>) -> ViewerState {
        let mut slot = self.slot.lock().await;
        slot.generation += 1;
        if let Some(task) = slot.task.take() {
            debug!(viewer = %self.id, "Aborting superseded fetch");
            task.abort();
        }
        let generation = slot.generation;

        let next = match source.as_ref().filter(|s| s.file.is_some()) {
            None => ViewerState::Idle,
            Some(src) => match src.url() {
                None => ViewerState::Error {
                    code: ViewerErrorCode::NoSource,
                    message: None,
                },
                Some(url) => match resolve_url(&self.base_url, url) {
                    Some(url) => {
                        let viewer = Arc::clone(self);
                        let handle = tokio::spawn(async move {
                            let result = fetch_text(&viewer.http, &url).await;
                            viewer.finish(generation, result).await;
                        });
                        slot.task = Some(handle.abort_handle());
                        ViewerState::Loading
                    }
                    None => ViewerState::Error {
                        code: ViewerErrorCode::FetchError,
                        message: Some(format!("unsupported url: {}", url)),
                    },
                },
            },
        };

        slot.source = source;
        slot.state = next.clone();
        self.publish(&next);
        next
    }

    /// Load the current source again.
    pub async fn refetch(self: &Arc<Self>) -> ViewerState {
        let source = self.slot.lock().await.source.clone();
        self.open(source).await
    }

    /// Cancel any fetch and go idle.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        slot.generation += 1;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        slot.source = None;
        slot.state = ViewerState::Idle;
        self.publish(&slot.state);
    }

    /// Record a fetch result; ignored unless `generation` is still current.
    async fn finish(&self, generation: u64, result: Result<String, String>) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.generation != generation {
            debug!(viewer = %self.id, generation, current = slot.generation, "Discarding stale fetch result");
            return false;
        }
        slot.task = None;
        slot.state = match result {
            Ok(content) => ViewerState::Success { content },
            Err(message) => {
                warn!(viewer = %self.id, "Failed to load file content: {}", message);
                ViewerState::Error {
                    code: ViewerErrorCode::FetchError,
                    message: Some(message),
                }
            }
        };
        self.publish(&slot.state);
        true
    }

    fn publish(&self, state: &ViewerState) {
        // No subscribers is fine.
        let _ = self.events.send(ViewerUpdate {
            viewer_id: self.id.clone(),
            state: state.clone(),
        });
    }
}

/// Absolute http(s) URLs are used as-is; rooted paths are joined to `base_url`.
fn resolve_url(base_url: &str, url: &str) -> Option<String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(url.to_string())
    } else if url.starts_with('/') {
        Some(format!("{}{}", base_url, url))
    } else {
        None
    }
}

async fn fetch_text(http: &reqwest::Client, url: &str) -> Result<String, String> {
    let response = http.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status.as_u16()));
    }
    response.text().await.map_err(|e| e.to_string())
}

/// All open viewers, keyed by panel id.
pub struct ViewerRegistry {
    viewers: DashMap<String, Arc<Viewer>>,
    http: reqwest::Client,
    base_url: String,
    event_tx: broadcast::Sender<ViewerUpdate>,
}

impl ViewerRegistry {
    pub fn new(http: reqwest::Client, base_url: &str) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            viewers: DashMap::new(),
            http,
            base_url: base_url.to_string(),
            event_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewerUpdate> {
        self.event_tx.subscribe()
    }

    pub fn open_count(&self) -> usize {
        self.viewers.len()
    }

    fn get_or_create(&self, viewer_id: &str) -> Arc<Viewer> {
        self.viewers
            .entry(viewer_id.to_string())
            .or_insert_with(|| {
                info!("Opening viewer {}", viewer_id);
                Arc::new(Viewer::new(
                    viewer_id,
                    self.http.clone(),
                    &self.base_url,
                    self.event_tx.clone(),
                ))
            })
            .clone()
    }

    /// Current state; unknown viewers are idle.
    pub async fn state(&self, viewer_id: &str) -> ViewerState {
        let viewer = self.viewers.get(viewer_id).map(|v| Arc::clone(v.value()));
        match viewer {
            Some(viewer) => viewer.state().await,
            None => ViewerState::Idle,
        }
    }

    pub async fn open(&self, viewer_id: &str, source: ViewerSource) -> ViewerState {
        self.get_or_create(viewer_id).open(Some(source)).await
    }

    /// Reload an open viewer; unknown viewers stay unknown and idle.
    pub async fn refetch(&self, viewer_id: &str) -> ViewerState {
        let viewer = self.viewers.get(viewer_id).map(|v| Arc::clone(v.value()));
        match viewer {
            Some(viewer) => viewer.refetch().await,
            None => ViewerState::Idle,
        }
    }

    pub async fn close(&self, viewer_id: &str) {
        if let Some((_, viewer)) = self.viewers.remove(viewer_id) {
            viewer.close().await;
            info!("Closed viewer {}", viewer_id);
        }
    }
}
