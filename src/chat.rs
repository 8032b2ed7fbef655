//! Fetch-then-normalize glue between the backend client and the handlers.
//!
//! Upstream failures stop here: they are logged and turned into an empty
//! (or placeholder) result so the UI always gets something renderable.

use crate::backend::{BackendClient, WorkspaceUrls};
use crate::normalizer::{normalize, ConversationTurn};
use crate::sessions::ExecutionSession;
use crate::workspace::{records_from_file_changes, workspace_tree, FileRecord};
use tracing::{debug, error, warn};

/// Session summary, or a fresh `accepted` placeholder if the fetch fails.
pub async fn load_session(client: &BackendClient, session_id: &str, progress: u32) -> ExecutionSession {
    match client.session(session_id).await {
        Ok(session) => ExecutionSession::from_response(session, progress),
        Err(e) => {
            error!(session_id, endpoint = e.endpoint(), "Failed to get session: {}", e);
            ExecutionSession::placeholder(session_id)
        }
    }
}

/// Conversation turns for a session; empty if the messages can't be fetched.
pub async fn load_turns(client: &BackendClient, session_id: &str) -> Vec<ConversationTurn> {
    match client.session_messages(session_id).await {
        Ok(messages) => {
            let turns = normalize(&messages);
            debug!(session_id, "Normalized {} messages into {} turns", messages.len(), turns.len());
            turns
        }
        Err(e) => {
            error!(session_id, endpoint = e.endpoint(), "Failed to get messages: {}", e);
            Vec::new()
        }
    }
}

/// Workspace tree for a session, ready to render.
///
/// Falls back to the session's recorded file changes when the workspace
/// listing endpoint fails; empty if both fail.
pub async fn load_files(client: &BackendClient, urls: &WorkspaceUrls, session_id: &str) -> Vec<FileRecord> {
    if session_id.is_empty() {
        return Vec::new();
    }

    let records = match client.workspace_files(session_id).await {
        Ok(records) => records,
        Err(e) => {
            warn!(session_id, "Workspace files endpoint failed ({}), using session data fallback", e);
            match client.session(session_id).await {
                Ok(session) => session
                    .state_patch
                    .as_ref()
                    .map(records_from_file_changes)
                    .unwrap_or_default(),
                Err(e) => {
                    error!(session_id, endpoint = e.endpoint(), "Failed to get files: {}", e);
                    return Vec::new();
                }
            }
        }
    };

    workspace_tree(&records, session_id, &|id: &str, path: &str| urls.file_url(id, path))
}
