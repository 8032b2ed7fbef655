//! HTTP client for the agent backend's `/api/v1` surface.
//!
//! Every backend response is wrapped as `{"code", "message", "data"}`; code 0
//! (or 200) means success and `data` carries the payload.

use crate::config::normalize_base_url;
use crate::error::{ApiError, ApiResult};
use crate::sessions::{RawMessage, SessionResponse};
use crate::workspace::FileRecord;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// GET `{base}/api/v1{endpoint}` and unwrap the response envelope.
    async fn get_data<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        let url = format!("{}{}{}", self.base_url, API_PREFIX, endpoint);
        let transport = |source: reqwest::Error| ApiError::Transport {
            endpoint: endpoint.to_string(),
            source,
        };

        let response = self
            .http
            .get(&url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status,
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        let envelope: Envelope<T> = serde_json::from_slice(&body).map_err(|source| ApiError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;

        if envelope.code != 0 && envelope.code != 200 {
            return Err(ApiError::Backend {
                endpoint: endpoint.to_string(),
                code: envelope.code,
                message: if envelope.message.is_empty() {
                    "API request failed".to_string()
                } else {
                    envelope.message
                },
            });
        }

        debug!("GET {} ok", endpoint);
        envelope.data.ok_or_else(|| ApiError::MissingData {
            endpoint: endpoint.to_string(),
        })
    }

    /// Like [`get_data`](Self::get_data) for list payloads, decoding row by row.
    ///
    /// A row that doesn't decode is skipped rather than failing the listing.
    async fn get_rows<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<Vec<T>> {
        let rows: Vec<serde_json::Value> = self.get_data(endpoint).await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .filter_map(|(index, row)| match serde_json::from_value(row) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    debug!("GET {}: skipping row {}: {}", endpoint, index, e);
                    None
                }
            })
            .collect())
    }

    /// `GET /sessions/{id}`
    pub async fn session(&self, session_id: &str) -> ApiResult<SessionResponse> {
        self.get_data(&format!("/sessions/{}", urlencoding::encode(session_id)))
            .await
    }

    /// `GET /sessions/{id}/messages`, oldest first.
    pub async fn session_messages(&self, session_id: &str) -> ApiResult<Vec<RawMessage>> {
        self.get_rows(&format!("/sessions/{}/messages", urlencoding::encode(session_id)))
            .await
    }

    /// `GET /sessions/{id}/workspace/files`
    pub async fn workspace_files(&self, session_id: &str) -> ApiResult<Vec<FileRecord>> {
        self.get_rows(&format!(
            "/sessions/{}/workspace/files",
            urlencoding::encode(session_id)
        ))
        .await
    }
}

/// Builds the preview/download links for workspace files.
#[derive(Debug, Clone)]
pub struct WorkspaceUrls {
    public_base: String,
}

impl WorkspaceUrls {
    /// `public_base` may be empty, giving same-origin links that resolve
    /// through the `/api/v1` proxy.
    pub fn new(public_base: &str) -> Self {
        Self {
            public_base: normalize_base_url(public_base),
        }
    }

    pub fn file_url(&self, session_id: &str, path: &str) -> String {
        format!(
            "{}{}/sessions/{}/workspace/file?path={}",
            self.public_base,
            API_PREFIX,
            urlencoding::encode(session_id),
            urlencoding::encode(path)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{envelope, serve, unused_addr};
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    fn client(base: &str) -> BackendClient {
        BackendClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_file_url_encodes_path() {
        let urls = WorkspaceUrls::new("http://api.example/");
        assert_eq!(
            urls.file_url("s-1", "docs/my file.md"),
            "http://api.example/api/v1/sessions/s-1/workspace/file?path=docs%2Fmy%20file.md"
        );
        assert_eq!(
            WorkspaceUrls::new("").file_url("s", "a&b"),
            "/api/v1/sessions/s/workspace/file?path=a%26b"
        );
    }

    #[tokio::test]
    async fn test_unwraps_envelope() {
        let app = Router::new().route(
            "/api/v1/sessions/{id}/messages",
            get(|| async {
                envelope(json!([
                    {"id": 1, "role": "user", "created_at": "t", "content": {"text": "hi"}},
                    {"id": 2, "role": "assistant", "content": "yo", "text_preview": "yo"}
                ]))
            }),
        );
        let base = serve(app).await;

        let messages = client(&base).session_messages("abc").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text_preview.as_deref(), Some("yo"));
    }

    #[tokio::test]
    async fn test_malformed_rows_skipped_not_fatal() {
        let app = Router::new()
            .route(
                "/api/v1/sessions/{id}/messages",
                get(|| async {
                    envelope(json!([
                        {"id": 1, "role": "user", "content": {"text": "hi"}},
                        {"id": 2, "role": null, "content": null},
                        {"id": 3, "role": 42},
                        {"id": 4, "role": "assistant", "content": "yo"}
                    ]))
                }),
            )
            .route(
                "/api/v1/sessions/{id}/workspace/files",
                get(|| async {
                    envelope(json!([
                        {"path": "a.txt", "name": null, "type": null},
                        {"path": "b.txt", "type": "symlink"},
                        {"path": "c.txt", "type": "file"}
                    ]))
                }),
            );
        let base = serve(app).await;
        let client = client(&base);

        let messages = client.session_messages("s").await.unwrap();
        let ids: Vec<String> = messages.iter().map(|m| m.id_string()).collect();
        assert_eq!(ids, vec!["1", "2", "4"]);

        let files = client.workspace_files("s").await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_code_200_counts_as_success() {
        let app = Router::new().route(
            "/api/v1/sessions/{id}",
            get(|| async { Json(json!({"code": 200, "message": "ok", "data": {"session_id": "abc", "status": "running"}})) }),
        );
        let base = serve(app).await;

        let session = client(&base).session("abc").await.unwrap();
        assert_eq!(session.session_id, "abc");
        assert_eq!(session.status.as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn test_error_kinds() {
        let app = Router::new()
            .route(
                "/api/v1/sessions/{id}/messages",
                get(|| async { Json(json!({"code": 40401, "message": "Session not found", "data": null})) }),
            )
            .route(
                "/api/v1/sessions/{id}/workspace/files",
                get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
            )
            .route("/api/v1/sessions/{id}", get(|| async { "not json" }));
        let base = serve(app).await;
        let client = client(&base);

        match client.session_messages("x").await {
            Err(ApiError::Backend { code, message, .. }) => {
                assert_eq!(code, 40401);
                assert_eq!(message, "Session not found");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            client.workspace_files("x").await,
            Err(ApiError::Status { status, .. }) if status == StatusCode::BAD_GATEWAY
        ));
        let err = client.session("x").await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
        assert_eq!(err.endpoint(), "/sessions/x");
    }

    #[tokio::test]
    async fn test_missing_data() {
        let app = Router::new().route(
            "/api/v1/sessions/{id}/messages",
            get(|| async { Json(json!({"code": 0, "message": "Success"})) }),
        );
        let base = serve(app).await;

        assert!(matches!(
            client(&base).session_messages("x").await,
            Err(ApiError::MissingData { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let base = format!("http://{}", unused_addr().await);
        assert!(matches!(
            client(&base).session_messages("x").await,
            Err(ApiError::Transport { .. })
        ));
    }
}
