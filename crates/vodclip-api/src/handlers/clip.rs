//! Clip extraction endpoint.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use serde::Deserialize;

use vodclip_models::{ClipRequest, CodecProfile, DeliveryMode, JobId};

use crate::error::{ApiError, ApiResult};
use crate::services::{ClipDelivery, ClipParams};
use crate::state::AppState;

pub const HEADER_JOB_ID: &str = "x-clip-job-id";
pub const HEADER_REQUESTED_START: &str = "x-clip-requested-start";
pub const HEADER_REQUESTED_END: &str = "x-clip-requested-end";
pub const HEADER_SNAPPED_START: &str = "x-clip-snapped-start";
pub const HEADER_SNAPPED_END: &str = "x-clip-snapped-end";
pub const HEADER_SNAPPED_DURATION: &str = "x-clip-snapped-duration";
pub const HEADER_DELIVERY: &str = "x-clip-delivery";
pub const HEADER_SOURCE: &str = "x-clip-source";
pub const HEADER_ARGS: &str = "x-clip-args";

/// Every custom header a clip response may carry.
pub const CLIP_HEADERS: &[&str] = &[
    HEADER_JOB_ID,
    HEADER_REQUESTED_START,
    HEADER_REQUESTED_END,
    HEADER_SNAPPED_START,
    HEADER_SNAPPED_END,
    HEADER_SNAPPED_DURATION,
    HEADER_DELIVERY,
    HEADER_SOURCE,
    HEADER_ARGS,
];

/// Raw query; parsed by hand so every malformed value gets a clear 400.
#[derive(Debug, Default, Deserialize)]
pub struct ClipQuery {
    pub asset: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub job: Option<String>,
    pub mode: Option<String>,
    pub profile: Option<String>,
    pub debug: Option<String>,
}

impl ClipQuery {
    pub fn debug_enabled(&self) -> bool {
        matches!(self.debug.as_deref(), Some("1" | "true" | "yes"))
    }

    /// Parse into pipeline parameters.
    pub fn into_params(self, user_agent: Option<String>) -> ApiResult<ClipParams> {
        let asset = required(self.asset, "asset")?;
        let start = parse_seconds(&required(self.start, "start")?, "start")?;
        let end = parse_seconds(&required(self.end, "end")?, "end")?;

        let job_id = non_empty(self.job).map(JobId::parse).transpose()?;
        let mode = non_empty(self.mode)
            .map(|s| s.parse::<DeliveryMode>())
            .transpose()
            .map_err(ApiError::bad_request)?;
        let profile = non_empty(self.profile)
            .map(|s| s.parse::<CodecProfile>())
            .transpose()
            .map_err(ApiError::bad_request)?;

        Ok(ClipParams {
            request: ClipRequest::new(asset, start, end),
            job_id,
            mode,
            profile,
            user_agent,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn required(value: Option<String>, name: &str) -> ApiResult<String> {
    non_empty(value)
        .ok_or_else(|| ApiError::bad_request(format!("Missing required parameter: {}", name)))
}

fn parse_seconds(value: &str, name: &str) -> ApiResult<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ApiError::bad_request(format!("{} must be a number of seconds", name)))
}

/// Extract a sub-clip of an asset as MP4.
pub async fn get_clip(
    State(state): State<AppState>,
    Query(query): Query<ClipQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let debug = query.debug_enabled();
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let params = query.into_params(user_agent)?;
    let delivery = state.clips.start(params).await?;

    Ok(clip_response(delivery, debug))
}

fn clip_response(delivery: ClipDelivery, debug: bool) -> Response {
    let filename = download_filename(
        &delivery.asset_id,
        delivery.snapped.start,
        delivery.snapped.end,
    );

    let mut response = Response::new(delivery.body);
    let headers = response.headers_mut();

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Some(len) = delivery.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    set_header(
        headers,
        header::CONTENT_DISPOSITION,
        &format!("attachment; filename=\"{}\"", filename),
    );

    let clip_headers = [
        (HEADER_JOB_ID, delivery.job_id.to_string()),
        (HEADER_REQUESTED_START, delivery.requested.start.to_string()),
        (HEADER_REQUESTED_END, delivery.requested.end.to_string()),
        (HEADER_SNAPPED_START, delivery.snapped.start.to_string()),
        (HEADER_SNAPPED_END, delivery.snapped.end.to_string()),
        (HEADER_SNAPPED_DURATION, delivery.snapped.duration.to_string()),
        (HEADER_DELIVERY, delivery.mode.to_string()),
    ];
    for (name, value) in clip_headers {
        set_header(headers, HeaderName::from_static(name), &value);
    }

    if debug {
        set_header(headers, HeaderName::from_static(HEADER_SOURCE), &delivery.source_url);
        set_header(
            headers,
            HeaderName::from_static(HEADER_ARGS),
            &delivery.args.join(" "),
        );
    }

    response
}

/// Control characters (the referer argument ends in CRLF) become spaces.
fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    let cleaned: String = value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if let Ok(value) = HeaderValue::from_str(cleaned.trim()) {
        headers.insert(name, value);
    }
}

/// `lecture-01_10-30.mp4`
fn download_filename(asset_id: &str, start: f64, end: f64) -> String {
    let stem: String = asset_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}-{}.mp4", stem, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(asset: &str, start: &str, end: &str) -> ClipQuery {
        ClipQuery {
            asset: Some(asset.to_string()),
            start: Some(start.to_string()),
            end: Some(end.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_query() {
        let mut q = query("lecture-01", "12", "22.5");
        q.mode = Some("buffer".to_string());
        q.job = Some("my-job".to_string());

        let params = q.into_params(None).unwrap();
        assert_eq!(params.request.asset_id, "lecture-01");
        assert_eq!(params.request.start, 12.0);
        assert_eq!(params.request.end, 22.5);
        assert_eq!(params.mode, Some(DeliveryMode::Buffered));
        assert_eq!(params.job_id.unwrap().as_str(), "my-job");
        assert!(params.profile.is_none());
    }

    #[test]
    fn test_parse_query_rejects_bad_values() {
        assert!(query("a", "abc", "10").into_params(None).is_err());
        assert!(query("a", "0", "inf").into_params(None).is_err());
        assert!(query("", "0", "10").into_params(None).is_err());

        let mut q = query("a", "0", "10");
        q.mode = Some("tape".to_string());
        assert!(matches!(q.into_params(None), Err(ApiError::BadRequest(_))));

        let mut q = query("a", "0", "10");
        q.job = Some("has space".to_string());
        assert!(matches!(q.into_params(None), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_debug_flag() {
        let mut q = ClipQuery::default();
        assert!(!q.debug_enabled());
        q.debug = Some("1".to_string());
        assert!(q.debug_enabled());
    }

    #[test]
    fn test_download_filename() {
        assert_eq!(download_filename("lecture-01", 10.0, 30.0), "lecture-01_10-30.mp4");
        assert_eq!(download_filename("a.b", 0.0, 4.5), "a_b_0-4.5.mp4");
    }

    #[test]
    fn test_header_values_are_sanitized() {
        let mut headers = HeaderMap::new();
        set_header(
            &mut headers,
            HeaderName::from_static(HEADER_ARGS),
            "-headers Referer: https://example.com/\r\n -i x",
        );
        let value = headers.get(HEADER_ARGS).unwrap().to_str().unwrap();
        assert!(!value.contains('\r'));
        assert!(value.contains("Referer: https://example.com/"));
    }
}
