//! API error types.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use vodclip_media::MediaError;
use vodclip_models::ModelError;
use vodclip_progress::ProgressError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Longest plaintext body returned for a tool failure.
pub const MAX_TOOL_MESSAGE_LEN: usize = 2000;

/// Returned when the tool failed without saying why.
pub const GENERIC_TOOL_FAILURE: &str = "FFmpeg failed to produce the clip";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The external tool could not be started or failed; sent as plaintext.
    #[error("{0}")]
    Tool(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Tool failure with its diagnostic, or a generic message when empty.
    pub fn tool(diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        let trimmed = diagnostic.trim();
        if trimmed.is_empty() {
            return Self::Tool(GENERIC_TOOL_FAILURE.to_string());
        }
        Self::Tool(truncate_chars(trimmed, MAX_TOOL_MESSAGE_LEN))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Tool(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Keep the last `max` characters; diagnostics end with the useful part.
fn truncate_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    s.chars().skip(count - max).collect()
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::IllegalTransition { .. } | ModelError::EmptyWindow { .. } => {
                ApiError::Internal(e.to_string())
            }
            _ => ApiError::Validation(e.to_string()),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        if e.is_upstream() {
            return ApiError::Upstream(e.to_string());
        }
        match e {
            MediaError::FfmpegFailed {
                message, stderr, ..
            } => match stderr.filter(|s| !s.trim().is_empty()) {
                Some(diagnostic) => ApiError::tool(diagnostic),
                None => ApiError::tool(message),
            },
            MediaError::FfmpegNotFound | MediaError::SpawnFailed(_) | MediaError::Stalled(_) => {
                ApiError::tool(e.to_string())
            }
            MediaError::InvalidWindow(msg) => ApiError::Validation(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ProgressError> for ApiError {
    fn from(e: ProgressError) -> Self {
        match e {
            ProgressError::JobNotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            ProgressError::DuplicateJob(id) => {
                ApiError::Conflict(format!("Job {} already exists", id))
            }
            ProgressError::ShutDown => ApiError::Unavailable("Server is shutting down".to_string()),
            ProgressError::Model(e) => e.into(),
            ProgressError::Json(e) => ApiError::Internal(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match self {
            ApiError::Tool(text) => (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                text,
            )
                .into_response(),
            other => {
                // Don't expose internal error details in production
                let detail = match &other {
                    ApiError::Internal(_)
                        if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" =>
                    {
                        "An internal error occurred".to_string()
                    }
                    _ => other.to_string(),
                };
                let code = match &other {
                    ApiError::Upstream(_) => Some("upstream_error".to_string()),
                    ApiError::Conflict(_) => Some("duplicate_job".to_string()),
                    _ => None,
                };
                (status, Json(ErrorResponse { detail, code })).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let upstream: ApiError = MediaError::UpstreamStatus {
            status: 404,
            url: "http://o/a/index.m3u8".to_string(),
        }
        .into();
        assert_eq!(upstream.status_code(), StatusCode::BAD_GATEWAY);

        let empty: ApiError = MediaError::EmptyPlaylist.into();
        assert_eq!(empty.status_code(), StatusCode::BAD_GATEWAY);

        let spawn: ApiError = MediaError::FfmpegNotFound.into();
        assert_eq!(spawn.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let dup: ApiError = ProgressError::DuplicateJob("abc".to_string()).into();
        assert_eq!(dup.status_code(), StatusCode::CONFLICT);

        let invalid: ApiError = ModelError::InvalidAssetId("../x".to_string()).into();
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_tool_message() {
        let err: ApiError = MediaError::ffmpeg_failed(
            "FFmpeg exited without producing output",
            Some("Server returned 404 Not Found".to_string()),
            Some(1),
        )
        .into();
        assert_eq!(err.to_string(), "Server returned 404 Not Found");

        let err: ApiError =
            MediaError::ffmpeg_failed("FFmpeg exited without producing output", None, Some(1))
                .into();
        assert_eq!(err.to_string(), "FFmpeg exited without producing output");

        assert_eq!(ApiError::tool("  ").to_string(), GENERIC_TOOL_FAILURE);
    }

    #[test]
    fn test_tool_message_is_bounded() {
        let long = format!("{}tail", "x".repeat(5000));
        let msg = ApiError::tool(long).to_string();
        assert_eq!(msg.chars().count(), MAX_TOOL_MESSAGE_LEN);
        assert!(msg.ends_with("tail"));
    }
}
