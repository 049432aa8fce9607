//! Requested and snapped clip windows.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::error::{ModelError, ModelResult};

/// Maximum length of an asset identifier.
pub const MAX_ASSET_ID_LENGTH: usize = 128;

/// A caller's request for a sub-clip of an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ClipRequest {
    /// Asset identifier on the origin
    #[validate(length(min = 1, max = 128, message = "asset_id must be 1-128 characters"))]
    pub asset_id: String,
    /// Requested start in seconds; values outside the asset are clamped later
    pub start: f64,
    /// Requested end in seconds
    pub end: f64,
}

impl ClipRequest {
    pub fn new(asset_id: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            asset_id: asset_id.into(),
            start,
            end,
        }
    }

    /// Requested duration in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Validate the request shape and bounds.
    ///
    /// `max_duration` caps the requested length, not the snapped one.
    /// Negative or past-the-end times pass; snapping clamps them.
    pub fn check(&self, max_duration: f64) -> ModelResult<()> {
        self.validate()
            .map_err(|e| ModelError::InvalidRequest(describe(&e)))?;

        if !is_valid_asset_id(&self.asset_id) {
            return Err(ModelError::InvalidAssetId(self.asset_id.clone()));
        }
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(ModelError::InvalidRequest(
                "start and end must be finite numbers".to_string(),
            ));
        }
        if self.end <= self.start {
            return Err(ModelError::InvalidRequest(format!(
                "end ({}) must be greater than start ({})",
                self.end, self.start
            )));
        }
        if self.duration() > max_duration {
            return Err(ModelError::WindowTooLong {
                requested: self.duration(),
                max: max_duration,
            });
        }
        Ok(())
    }
}

fn describe(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{} is invalid", field),
            })
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

/// Time range as requested by the caller, kept for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestedWindow {
    pub start: f64,
    pub end: f64,
}

impl From<&ClipRequest> for RequestedWindow {
    fn from(req: &ClipRequest) -> Self {
        Self {
            start: req.start,
            end: req.end,
        }
    }
}

/// A window aligned to segment boundaries.
///
/// Always satisfies `end > start` and `duration == end - start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnappedWindow {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl SnappedWindow {
    /// Build a window from two boundaries.
    pub fn new(start: f64, end: f64) -> ModelResult<Self> {
        if !(end > start) {
            return Err(ModelError::EmptyWindow { start, end });
        }
        Ok(Self {
            start,
            end,
            duration: end - start,
        })
    }

    /// Duration in whole milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.duration * 1000.0).round() as u64
    }
}

/// Check that an asset id is safe to substitute into an origin URL.
pub fn is_valid_asset_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ASSET_ID_LENGTH
        && !id.contains("..")
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_request_check() {
        assert_ok!(ClipRequest::new("lecture-01", 12.0, 22.0).check(600.0));
        assert_err!(ClipRequest::new("lecture-01", 22.0, 12.0).check(600.0));
        assert_err!(ClipRequest::new("lecture-01", 5.0, 5.0).check(600.0));
        assert_err!(ClipRequest::new("", 0.0, 1.0).check(600.0));
        assert_err!(ClipRequest::new("lecture-01", 0.0, f64::INFINITY).check(600.0));
    }

    #[test]
    fn test_out_of_range_times_pass_check() {
        assert_ok!(ClipRequest::new("lecture-01", -5.0, 10.0).check(600.0));
        assert_ok!(ClipRequest::new("lecture-01", 500.0, 900.0).check(600.0));
        assert_err!(ClipRequest::new("lecture-01", -5.0, f64::NAN).check(600.0));
    }

    #[test]
    fn test_validation_message_is_readable() {
        let err = ClipRequest::new("", 0.0, 1.0).check(600.0).unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidRequest("asset_id must be 1-128 characters".to_string())
        );

        let long = "x".repeat(MAX_ASSET_ID_LENGTH + 1);
        let err = ClipRequest::new(long, 0.0, 1.0).check(600.0).unwrap_err();
        assert!(err.to_string().contains("asset_id must be 1-128 characters"));
    }

    #[test]
    fn test_request_too_long() {
        let err = ClipRequest::new("a", 0.0, 700.0).check(600.0).unwrap_err();
        assert!(matches!(err, ModelError::WindowTooLong { .. }));
    }

    #[test]
    fn test_asset_id_validation() {
        assert!(is_valid_asset_id("course_2024.part-3"));
        assert!(!is_valid_asset_id("../etc/passwd"));
        assert!(!is_valid_asset_id("a/b"));
        assert!(!is_valid_asset_id("a b"));
        assert!(!is_valid_asset_id(&"x".repeat(129)));
    }

    #[test]
    fn test_snapped_window() {
        let w = SnappedWindow::new(10.0, 30.0).unwrap();
        assert_eq!(w.duration, 20.0);
        assert_eq!(w.duration_ms(), 20_000);
        assert!(SnappedWindow::new(10.0, 10.0).is_err());
        assert!(SnappedWindow::new(10.0, f64::NAN).is_err());
    }
}
