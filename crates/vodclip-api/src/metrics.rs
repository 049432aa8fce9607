//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vodclip_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vodclip_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vodclip_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "vodclip_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "vodclip_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "vodclip_ws_messages_sent_total";
    pub const WS_MESSAGES_RECEIVED: &str = "vodclip_ws_messages_received_total";

    // Job metrics
    pub const JOBS_STARTED_TOTAL: &str = "vodclip_jobs_started_total";
    pub const JOBS_FINISHED_TOTAL: &str = "vodclip_jobs_finished_total";
    pub const JOBS_ACTIVE: &str = "vodclip_jobs_active";
    pub const JOBS_EVICTED_TOTAL: &str = "vodclip_jobs_evicted_total";

    // Processing metrics
    pub const FFMPEG_DURATION_SECONDS: &str = "vodclip_ffmpeg_duration_seconds";
    pub const WATCHDOG_TRIPS_TOTAL: &str = "vodclip_watchdog_trips_total";
    pub const PLAYLIST_FETCH_DURATION_SECONDS: &str = "vodclip_playlist_fetch_duration_seconds";
    pub const UPSTREAM_ERRORS_TOTAL: &str = "vodclip_upstream_errors_total";
    pub const BYTES_SENT_TOTAL: &str = "vodclip_bytes_sent_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "vodclip_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record WebSocket connection.
pub fn record_ws_connection(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_CONNECTIONS_TOTAL, &labels).increment(1);
}

/// Update active WebSocket connections gauge.
pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Record WebSocket message sent.
pub fn record_ws_message_sent(endpoint: &str, message_type: &str) {
    let labels = [
        ("endpoint", endpoint.to_string()),
        ("type", message_type.to_string()),
    ];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

/// Record WebSocket message received.
pub fn record_ws_message_received(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_MESSAGES_RECEIVED, &labels).increment(1);
}

/// Record a clip job accepted for processing.
pub fn record_job_started(mode: &str, profile: &str) {
    let labels = [("mode", mode.to_string()), ("profile", profile.to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
}

/// Record a job reaching a terminal status.
pub fn record_job_finished(mode: &str, status: &str) {
    let labels = [("mode", mode.to_string()), ("status", status.to_string())];
    counter!(names::JOBS_FINISHED_TOTAL, &labels).increment(1);
}

/// Update active jobs gauge.
pub fn set_active_jobs(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}

/// Record jobs evicted from the registry.
pub fn record_jobs_evicted(count: usize) {
    counter!(names::JOBS_EVICTED_TOTAL).increment(count as u64);
}

/// Record FFmpeg processing duration.
pub fn record_ffmpeg_duration(profile: &str, outcome: &str, duration_secs: f64) {
    let labels = [
        ("profile", profile.to_string()),
        ("outcome", outcome.to_string()),
    ];
    histogram!(names::FFMPEG_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a watchdog kill.
pub fn record_watchdog_trip() {
    counter!(names::WATCHDOG_TRIPS_TOTAL).increment(1);
}

/// Record playlist fetch duration.
pub fn record_playlist_fetch_duration(duration_secs: f64) {
    histogram!(names::PLAYLIST_FETCH_DURATION_SECONDS).record(duration_secs);
}

/// Record an origin failure.
pub fn record_upstream_error() {
    counter!(names::UPSTREAM_ERRORS_TOTAL).increment(1);
}

/// Record media bytes handed to callers.
pub fn record_bytes_sent(mode: &str, bytes: u64) {
    let labels = [("mode", mode.to_string())];
    counter!(names::BYTES_SENT_TOTAL, &labels).increment(bytes);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Metrics middleware for HTTP requests.
///
/// Requests are labelled by their route template so ids do not explode
/// label cardinality.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    // Increment in-flight counter
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    // Decrement in-flight counter
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
