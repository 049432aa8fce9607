//! Clip job identity, status and state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::plan::{CodecProfile, DeliveryMode};
use crate::window::{RequestedWindow, SnappedWindow};

/// Maximum length of a caller-supplied job id.
pub const MAX_JOB_ID_LENGTH: usize = 64;

/// Progress stays below this until the tool reports completion.
pub const MAX_RUNNING_PERCENT: u8 = 99;

/// Unique identifier for a clip job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a caller-supplied id after checking its format.
    pub fn parse(s: impl Into<String>) -> ModelResult<Self> {
        let s = s.into();
        if is_valid_job_id(&s) {
            Ok(Self(s))
        } else {
            Err(ModelError::InvalidJobId(s))
        }
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job ids travel in URLs and headers.
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_JOB_ID_LENGTH
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Clip job lifecycle.
///
/// ```text
/// starting -> running -> ready -> done
///                     \-> done
/// (any non-terminal) -> error | canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    /// Accepted, window not yet known
    #[default]
    Starting,
    /// External tool launched
    Running,
    /// Buffered artifact complete, not yet sent
    Ready,
    /// All bytes reached the caller
    Done,
    /// Unrecoverable failure
    Error,
    /// Caller went away before delivery finished
    Canceled,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Starting => "starting",
            ClipStatus::Running => "running",
            ClipStatus::Ready => "ready",
            ClipStatus::Done => "done",
            ClipStatus::Error => "error",
            ClipStatus::Canceled => "canceled",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClipStatus::Done | ClipStatus::Error | ClipStatus::Canceled
        )
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(&self, next: ClipStatus) -> bool {
        use ClipStatus::*;
        match (*self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Error | Canceled) => true,
            (Starting, Running) => true,
            (Running, Ready | Done) => true,
            (Ready, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool progress against the snapped window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobProgress {
    /// Media time processed so far
    pub processed_ms: u64,
    /// Percent of the snapped duration (0-100)
    pub percent: u8,
}

/// Bytes handed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Transfer {
    pub bytes_sent: u64,
    /// Known only in buffered delivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

/// One in-flight extraction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipJob {
    pub job_id: JobId,
    pub asset_id: String,
    pub status: ClipStatus,
    pub requested: RequestedWindow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapped: Option<SnappedWindow>,
    pub delivery_mode: DeliveryMode,
    pub codec_profile: CodecProfile,
    pub progress: JobProgress,
    pub transfer: Transfer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sequence number for event ordering (monotonically increasing)
    pub event_seq: u64,
}

impl ClipJob {
    /// Create a job in the `starting` state.
    pub fn new(
        job_id: JobId,
        asset_id: impl Into<String>,
        requested: RequestedWindow,
        delivery_mode: DeliveryMode,
        codec_profile: CodecProfile,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            asset_id: asset_id.into(),
            status: ClipStatus::Starting,
            requested,
            snapped: None,
            delivery_mode,
            codec_profile,
            progress: JobProgress::default(),
            transfer: Transfer::default(),
            error: None,
            created_at: now,
            updated_at: now,
            event_seq: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.event_seq += 1;
    }

    /// Move to `next` if the edge is legal.
    pub fn transition(&mut self, next: ClipStatus) -> ModelResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Record the snapped window once the playlist is analyzed.
    pub fn set_snapped(&mut self, window: SnappedWindow) {
        if self.is_terminal() {
            return;
        }
        self.snapped = Some(window);
        self.touch();
    }

    /// Record processed media time.
    ///
    /// Percent never decreases and stays at or below 99 until
    /// [`ClipJob::complete_progress`] is called.
    pub fn record_progress(&mut self, processed_ms: u64) {
        if self.is_terminal() {
            return;
        }
        let duration_ms = self.snapped.map(|w| w.duration_ms()).unwrap_or(0);
        let percent = if duration_ms == 0 {
            0
        } else {
            ((processed_ms as f64 / duration_ms as f64) * 100.0)
                .clamp(0.0, MAX_RUNNING_PERCENT as f64) as u8
        };

        self.progress.processed_ms = self.progress.processed_ms.max(processed_ms);
        self.progress.percent = self
            .progress
            .percent
            .max(percent.min(MAX_RUNNING_PERCENT));
        self.touch();
    }

    /// The tool reported its completion marker.
    pub fn complete_progress(&mut self) {
        if self.is_terminal() {
            return;
        }
        if let Some(window) = self.snapped {
            self.progress.processed_ms = self.progress.processed_ms.max(window.duration_ms());
        }
        self.progress.percent = 100;
        self.touch();
    }

    /// Add bytes handed to the caller.
    pub fn add_bytes_sent(&mut self, n: u64) {
        if self.is_terminal() {
            return;
        }
        self.transfer.bytes_sent += n;
        self.touch();
    }

    pub fn set_total_bytes(&mut self, total: u64) {
        if self.is_terminal() {
            return;
        }
        self.transfer.total_bytes = Some(total);
        self.touch();
    }

    /// Mark job as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) -> ModelResult<()> {
        self.transition(ClipStatus::Error)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Mark job as canceled by the caller.
    pub fn cancel(&mut self) -> ModelResult<()> {
        self.transition(ClipStatus::Canceled)
    }
}
