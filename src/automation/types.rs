//! Request/response types and the bootstrap seam of the automation API

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Body of `POST /v1/terminal/bootstrap`.
///
/// When handed to a [`BootstrapHandler`], `cwd` is already canonicalized
/// and known to lie under an allowed root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapRequest {
    pub cwd: PathBuf,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    pub session_id: String,
}

/// Creates the session for a validated bootstrap request.
///
/// Supplied by whatever composes the application; the server only
/// validates, bounds and reports.
#[async_trait]
pub trait BootstrapHandler: Send + Sync {
    async fn bootstrap(&self, request: BootstrapRequest) -> anyhow::Result<BootstrapResponse>;

    /// Called with the id of a session whose bootstrap finished after the
    /// HTTP caller already got a timeout.
    async fn discard(&self, _session_id: &str) {}
}

/// Error returned to an automation client.
///
/// The display text is the public message placed in `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("content type must be application/json")]
    UnsupportedMediaType,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("{0}")]
    Internal(String),

    #[error("automation API is not available")]
    Unavailable,

    #[error("bootstrap timed out")]
    Timeout,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::PayloadTooLarge => 413,
            Self::UnsupportedMediaType => 415,
            Self::RateLimited => 429,
            Self::Internal(_) => 500,
            Self::Unavailable => 503,
            Self::Timeout => 504,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_rejects_unknown_keys() {
        let ok: BootstrapRequest =
            serde_json::from_str(r#"{"cwd": "/w", "commands": ["ls"]}"#).unwrap();
        assert_eq!(ok.cwd, PathBuf::from("/w"));

        let err = serde_json::from_str::<BootstrapRequest>(
            r#"{"cwd": "/w", "commands": ["ls"], "shell": "/bin/sh"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_response_uses_camel_case() {
        let body = serde_json::to_value(BootstrapResponse {
            session_id: "abc".into(),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"sessionId": "abc"}));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::bad_request("x").status(), 400);
        assert_eq!(ApiError::Forbidden("origin").status(), 403);
        assert_eq!(ApiError::RateLimited.status(), 429);
        assert_eq!(ApiError::Timeout.status(), 504);
        assert_eq!(ApiError::Internal("boom".into()).to_string(), "boom");
    }
}
