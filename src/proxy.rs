//! Reverse proxy for `/api/v1/*`.
//!
//! Forwards method, path, query and body to the backend origin so the UI can
//! stay same-origin. Hop-by-hop headers are dropped in both directions and
//! `x-forwarded-host` / `x-forwarded-proto` are filled in when absent.
//! Redirects are passed back to the caller, never followed.

use crate::backend::API_PREFIX;
use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, error};

pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Copy of `headers` without hop-by-hop entries.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut copied = headers.clone();
    for name in HOP_BY_HOP_HEADERS {
        copied.remove(name);
    }
    copied
}

/// Headers to send upstream for an incoming request arriving over `scheme`.
pub fn forwarded_headers(incoming: &HeaderMap, scheme: &str) -> HeaderMap {
    let mut headers = strip_hop_by_hop(incoming);
    if let Some(host) = incoming.get(header::HOST) {
        if !headers.contains_key(&X_FORWARDED_HOST) {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }
    }
    if !headers.contains_key(&X_FORWARDED_PROTO) {
        if let Ok(proto) = HeaderValue::from_str(scheme) {
            headers.insert(X_FORWARDED_PROTO, proto);
        }
    }
    headers
}

/// `{backend}/api/v1/{path}` plus the original query string, if any.
pub fn target_url(backend_url: &str, path: &str, query: Option<&str>) -> String {
    match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{}{}/{}?{}", backend_url, API_PREFIX, path, query),
        None => format!("{}{}/{}", backend_url, API_PREFIX, path),
    }
}

pub async fn proxy_request(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Forward the path as received; the extracted one is percent-decoded.
    let raw_path = uri
        .path()
        .strip_prefix(API_PREFIX)
        .and_then(|p| p.strip_prefix('/'))
        .unwrap_or(&path);
    let target = target_url(&state.config.backend_url, raw_path, uri.query());
    let scheme = uri.scheme_str().unwrap_or("http");
    debug!("Proxying {} {}", method, target);

    let mut request = state
        .proxy_http
        .request(method.clone(), &target)
        .headers(forwarded_headers(&headers, scheme));
    if method != Method::GET && method != Method::HEAD {
        request = request.body(body);
    }

    let upstream = match request.send().await {
        Ok(upstream) => upstream,
        Err(e) => return bad_gateway(&method, &target, e),
    };

    let status = upstream.status();
    let response_headers = strip_hop_by_hop(upstream.headers());
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return bad_gateway(&method, &target, e),
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

fn bad_gateway(method: &Method, target: &str, e: reqwest::Error) -> Response {
    error!("Proxy {} {} failed: {}", method, target, e);
    (
        StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({
            "code": StatusCode::BAD_GATEWAY.as_u16(),
            "message": format!("Backend unavailable: {}", e),
            "data": null,
        })),
    )
        .into_response()
}
