//! Typed failures for calls to the agent backend.

use reqwest::StatusCode;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Failure talking to the agent backend.
///
/// Never reaches a handler's response: `chat` logs it and degrades to an
/// empty result.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("API error: {status} from {endpoint}")]
    Status { endpoint: String, status: StatusCode },
    #[error("{endpoint} returned code {code}: {message}")]
    Backend {
        endpoint: String,
        code: i64,
        message: String,
    },
    #[error("{endpoint} returned no data")]
    MissingData { endpoint: String },
    #[error("invalid response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    pub fn endpoint(&self) -> &str {
        match self {
            ApiError::Transport { endpoint, .. }
            | ApiError::Status { endpoint, .. }
            | ApiError::Backend { endpoint, .. }
            | ApiError::MissingData { endpoint }
            | ApiError::Decode { endpoint, .. } => endpoint,
        }
    }
}
