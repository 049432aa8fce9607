//! Axum HTTP API server for VOD clip extraction.
//!
//! This crate provides:
//! - `GET /api/clip`, streamed or buffered MP4 sub-clips of HLS assets
//! - Job polling and a WebSocket progress feed
//! - Per-IP rate limiting and security headers
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod ws;

pub use config::{ApiConfig, ClipConfig};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{ClipService, JobReaper};
pub use state::AppState;
