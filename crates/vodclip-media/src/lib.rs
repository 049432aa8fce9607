//! Playlist analysis and FFmpeg orchestration for clip extraction.
//!
//! This crate provides:
//! - Media playlist parsing with lenient durations and segment-boundary snapping
//! - Manifest fetching from the origin, following master playlists
//! - Type-safe FFmpeg command building for remux and transcode clips
//! - Progress parsing from `-progress pipe:2`
//! - A supervised process with a first-byte watchdog and cancellation
//! - Delivery mode selection and self-deleting scratch files

pub mod analyzer;
pub mod command;
pub mod delivery;
pub mod error;
pub mod playlist;
pub mod process;
pub mod progress;

pub use analyzer::{AnalyzedPlaylist, AnalyzerConfig, PlaylistAnalyzer};
pub use command::{build_clip_command, resolve_ffmpeg, FfmpegCommand, OutputTarget};
pub use delivery::{
    ensure_scratch_dir, requires_indexed_container, select_delivery_mode, ScratchFile,
    ScratchStream,
};
pub use error::{MediaError, MediaResult};
pub use playlist::{
    ceil_boundary, compute_snapped_window, floor_boundary, parse_manifest, Manifest, Playlist,
};
pub use process::{
    CancelHandle, ClipProcess, OutcomeWatch, OutputStream, ProcessEvent, ProcessOptions,
    ProcessOutcome, ToolFailure,
};
pub use progress::{FfmpegProgress, LineBuffer, ProgressParser, StderrLine};
