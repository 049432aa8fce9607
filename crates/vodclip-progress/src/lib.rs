//! In-process clip job registry with progress fan-out.
//!
//! This crate provides:
//! - A registry of in-flight and recently finished clip jobs
//! - Snapshot fan-out to live subscribers with non-blocking sends
//! - Retention-based eviction of terminal jobs
//!
//! State lives in this process only; multiple service instances do not
//! share jobs.

pub mod bus;
pub mod error;

pub use bus::{
    BusConfig, ProgressBus, SnapshotFrame, Subscription, DEFAULT_RETENTION_SECS,
    DEFAULT_SUBSCRIBER_BUFFER,
};
pub use error::{ProgressError, ProgressResult};
