//! Runtime configuration, read once from the environment at startup.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PORT` | 4860 |
//! | `BACKEND_URL`, `POCO_BACKEND_URL`, `POCO_API_URL` (first set wins) | `http://localhost:8000` |
//! | `PUBLIC_API_URL` | empty (file links go through this server's proxy) |
//! | `STATIC_DIR` | `static` |
//! | `UPSTREAM_TIMEOUT_SECS` | 30 |

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 4860;
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Backend origin, without trailing slash.
    pub backend_url: String,
    /// Prefix for workspace file links handed to the UI.
    pub public_api_url: String,
    pub static_dir: PathBuf,
    pub upstream_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url = ["BACKEND_URL", "POCO_BACKEND_URL", "POCO_API_URL"]
            .iter()
            .find_map(|key| get(*key))
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());

        Self {
            port: get("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            backend_url: normalize_base_url(&backend_url),
            public_api_url: normalize_base_url(&get("PUBLIC_API_URL").unwrap_or_default()),
            static_dir: PathBuf::from(get("STATIC_DIR").unwrap_or_else(|| "static".to_string())),
            upstream_timeout: Duration::from_secs(
                get("UPSTREAM_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
        }
    }
}

/// Strip trailing slashes so paths can be appended with `/`.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
