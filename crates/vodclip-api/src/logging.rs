//! Structured clip job logging.
//!
//! Every lifecycle line for a job carries the same `job_id`, `asset_id`
//! and `mode` fields so one request can be followed across tasks.

use tracing::{error, info, warn, Span};
use vodclip_models::{DeliveryMode, JobId};

/// Job logger with fixed contextual fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    asset_id: String,
    mode: DeliveryMode,
}

impl JobLogger {
    pub fn new(job_id: &JobId, asset_id: &str, mode: DeliveryMode) -> Self {
        Self {
            job_id: job_id.to_string(),
            asset_id: asset_id.to_string(),
            mode,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            asset_id = %self.asset_id,
            mode = %self.mode,
            "Clip started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            asset_id = %self.asset_id,
            mode = %self.mode,
            "Clip progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            asset_id = %self.asset_id,
            mode = %self.mode,
            "Clip warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            asset_id = %self.asset_id,
            mode = %self.mode,
            "Clip error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            asset_id = %self.asset_id,
            mode = %self.mode,
            "Clip completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Span covering the background work of one job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "clip_job",
            job_id = %self.job_id,
            asset_id = %self.asset_id,
            mode = %self.mode
        )
    }
}
