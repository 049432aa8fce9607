//! Segmented-media playlist parsing and boundary snapping.
//!
//! Parsing is lenient about durations: an `#EXTINF` value that is missing,
//! malformed, non-finite or negative counts as zero so a single bad line
//! never aborts analysis of an otherwise usable manifest.

use m3u8_rs::{MasterPlaylist, MediaPlaylist};
use tracing::warn;

use vodclip_models::SnappedWindow;

use crate::error::{MediaError, MediaResult};

/// A fetched manifest, either a variant list or a segment list.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    /// Master playlist, reduced to the URI of its best variant
    Master { variant: String },
    Media(Playlist),
}

/// Parse a manifest body.
///
/// A master playlist without any non-I-frame variant is an empty source.
pub fn parse_manifest(bytes: &[u8]) -> MediaResult<Manifest> {
    match m3u8_rs::parse_playlist_res(bytes) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => select_variant(&master)
            .map(|variant| Manifest::Master { variant })
            .ok_or(MediaError::EmptyPlaylist),
        Ok(m3u8_rs::Playlist::MediaPlaylist(media)) => {
            Ok(Manifest::Media(Playlist::from_media(&media)))
        }
        Err(_) => {
            warn!(bytes = bytes.len(), "Manifest body is not an HLS playlist");
            Err(MediaError::InvalidPlaylist(
                "body is not an HLS playlist".to_string(),
            ))
        }
    }
}

/// URI of the highest-bandwidth variant in a master playlist.
///
/// Ties keep the first listed variant. I-frame-only variants are skipped.
pub fn select_variant(master: &MasterPlaylist) -> Option<String> {
    master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame && !v.uri.is_empty())
        .fold(None, |best: Option<&m3u8_rs::VariantStream>, v| match best {
            Some(current) if current.bandwidth >= v.bandwidth => Some(current),
            _ => Some(v),
        })
        .map(|v| v.uri.clone())
}

/// Ordered segment durations of a media playlist.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Playlist {
    segments: Vec<f64>,
}

impl Playlist {
    pub fn from_media(media: &MediaPlaylist) -> Self {
        Self {
            segments: media
                .segments
                .iter()
                .map(|segment| segment_duration(segment.duration))
                .collect(),
        }
    }

    pub fn from_durations(durations: impl IntoIterator<Item = f64>) -> Self {
        Self {
            segments: durations
                .into_iter()
                .map(|d| if d.is_finite() && d >= 0.0 { d } else { 0.0 })
                .collect(),
        }
    }

    pub fn segments(&self) -> &[f64] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sum of all segment durations in seconds.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().sum()
    }

    /// Cumulative boundaries: `[0, d0, d0+d1, ...]`, one more than segments.
    pub fn boundaries(&self) -> Vec<f64> {
        let mut boundaries = Vec::with_capacity(self.segments.len() + 1);
        let mut acc = 0.0;
        boundaries.push(acc);
        for d in &self.segments {
            acc += d;
            boundaries.push(acc);
        }
        boundaries
    }
}

/// Parse one `#EXTINF` duration token.
pub fn sanitize_duration(token: &str) -> f64 {
    match token.trim().parse::<f64>() {
        Ok(d) if d.is_finite() && d >= 0.0 => d,
        _ => 0.0,
    }
}

// The parser stores f32; its shortest display form is the manifest's decimal.
fn segment_duration(duration: f32) -> f64 {
    sanitize_duration(&duration.to_string())
}

/// Largest boundary `<= t`.
pub fn floor_boundary(boundaries: &[f64], t: f64) -> f64 {
    let idx = boundaries.partition_point(|&b| b <= t);
    match idx {
        0 => boundaries.first().copied().unwrap_or(0.0),
        i => boundaries[i - 1],
    }
}

/// Smallest boundary `>= t`.
pub fn ceil_boundary(boundaries: &[f64], t: f64) -> f64 {
    let idx = boundaries.partition_point(|&b| b < t);
    match boundaries.get(idx) {
        Some(&b) => b,
        None => boundaries.last().copied().unwrap_or(0.0),
    }
}

/// Snap a requested range to segment boundaries.
///
/// The range is clamped into `[0, total]` first. If floor and ceil collapse
/// onto the same boundary the end advances to the next distinct boundary,
/// or the start retreats to the previous one when already at the end.
pub fn compute_snapped_window(
    boundaries: &[f64],
    requested_start: f64,
    requested_end: f64,
) -> MediaResult<SnappedWindow> {
    let total = boundaries.last().copied().unwrap_or(0.0);
    if !(total > 0.0) {
        return Err(MediaError::EmptyPlaylist);
    }

    let clamp = |t: f64| if t.is_nan() { 0.0 } else { t.clamp(0.0, total) };
    let req_start = clamp(requested_start);
    let req_end = clamp(requested_end);

    let mut start = floor_boundary(boundaries, req_start);
    let mut end = ceil_boundary(boundaries, req_end);

    if end <= start {
        let next = boundaries.partition_point(|&b| b <= start);
        match boundaries.get(next) {
            Some(&b) => end = b,
            None => {
                end = total;
                let prev = boundaries.partition_point(|&b| b < total);
                start = boundaries[..prev].last().copied().unwrap_or(0.0);
            }
        }
    }

    SnappedWindow::new(start, end).map_err(|e| MediaError::InvalidWindow(e.to_string()))
}
