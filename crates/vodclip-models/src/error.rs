//! Model validation errors.

use thiserror::Error;

use crate::job::ClipStatus;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid asset id: {0}")]
    InvalidAssetId(String),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error("Requested window of {requested:.3}s exceeds the {max:.0}s limit")]
    WindowTooLong { requested: f64, max: f64 },

    #[error("Empty window [{start}, {end})")]
    EmptyWindow { start: f64, end: f64 },

    #[error("Illegal job transition {from} -> {to}")]
    IllegalTransition { from: ClipStatus, to: ClipStatus },
}
