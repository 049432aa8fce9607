//! Request handlers.

pub mod clip;
pub mod jobs;

pub use clip::get_clip;
pub use jobs::get_job;
