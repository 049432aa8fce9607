//! Business logic services.

pub mod clip_service;
pub mod job_reaper;

pub use clip_service::{ClipDelivery, ClipParams, ClipService};
pub use job_reaper::JobReaper;
