//! Application state.

use std::sync::Arc;

use tracing::info;

use vodclip_media::{ensure_scratch_dir, resolve_ffmpeg, PlaylistAnalyzer};
use vodclip_progress::ProgressBus;

use crate::config::ApiConfig;
use crate::error::ApiResult;
use crate::services::ClipService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub bus: ProgressBus,
    pub clips: ClipService,
}

impl AppState {
    /// Create new application state.
    pub async fn new(config: ApiConfig) -> ApiResult<Self> {
        let ffmpeg = resolve_ffmpeg(config.clip.ffmpeg_path.as_deref())?;
        info!("Using FFmpeg at {}", ffmpeg.display());

        ensure_scratch_dir(&config.clip.scratch_dir).await?;

        let analyzer = PlaylistAnalyzer::new(config.clip.analyzer.clone())?;
        let bus = ProgressBus::new(config.progress.clone());
        let clips = ClipService::new(config.clip.clone(), ffmpeg, analyzer, bus.clone());

        Ok(Self {
            config: Arc::new(config),
            bus,
            clips,
        })
    }

    /// Stop accepting jobs and detach live subscribers.
    pub fn shutdown(&self) {
        self.bus.shutdown();
    }
}
