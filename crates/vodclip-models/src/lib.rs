//! Shared data models for the vodclip service.
//!
//! This crate provides Serde-serializable types for:
//! - Clip requests and segment-aligned windows
//! - Clip jobs and their state machine
//! - Clip plans (delivery mode, codec profile, network resilience)
//! - WebSocket message schemas

pub mod error;
pub mod job;
pub mod plan;
pub mod window;
pub mod ws;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use job::{is_valid_job_id, ClipJob, ClipStatus, JobId, JobProgress, Transfer};
pub use plan::{ClipPlan, CodecProfile, DeliveryMode, NetworkResilience, TranscodeSettings};
pub use window::{is_valid_asset_id, ClipRequest, RequestedWindow, SnappedWindow};
pub use ws::{WsMessage, WsMessageType};
