//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while analyzing a source or running the tool.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("Failed to launch FFmpeg: {0}")]
    SpawnFailed(String),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFmpeg produced no output within {0} seconds")]
    Stalled(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream returned HTTP {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    #[error("Invalid manifest URL: {0}")]
    InvalidManifestUrl(String),

    #[error("Unparseable playlist: {0}")]
    InvalidPlaylist(String),

    #[error("Playlist has no playable duration")]
    EmptyPlaylist,

    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the failure came from the origin rather than from us.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            MediaError::UpstreamUnreachable(_)
                | MediaError::UpstreamStatus { .. }
                | MediaError::InvalidPlaylist(_)
                | MediaError::EmptyPlaylist
        )
    }
}
