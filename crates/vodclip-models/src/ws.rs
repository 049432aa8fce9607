//! Live job feed message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::ClipJob;

/// WebSocket message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Full job snapshot
    Snapshot,
    /// Error message
    Error,
}

impl WsMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsMessageType::Snapshot => "snapshot",
            WsMessageType::Error => "error",
        }
    }
}

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Current state of a job; every mutation produces one
    Snapshot { job: ClipJob },

    /// Error message
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl WsMessage {
    /// Create a snapshot message.
    pub fn snapshot(job: ClipJob) -> Self {
        WsMessage::Snapshot { job }
    }

    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        WsMessage::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the message type.
    pub fn message_type(&self) -> WsMessageType {
        match self {
            WsMessage::Snapshot { .. } => WsMessageType::Snapshot,
            WsMessage::Error { .. } => WsMessageType::Error,
        }
    }
}
