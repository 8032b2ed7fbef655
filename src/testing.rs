//! In-process fake servers for tests.

use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A local address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Wrap `data` the way the backend does.
pub fn envelope(data: Value) -> Json<Value> {
    Json(json!({"code": 0, "message": "Success", "data": data}))
}
