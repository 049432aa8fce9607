//! Clip plan: delivery mode, codec profile and network resilience flags.
//!
//! Every variant of the clip endpoint is expressed as one [`ClipPlan`] value
//! instead of a separate code path per flag combination.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default capped output width for transcodes
pub const DEFAULT_MAX_WIDTH: u32 = 1280;
/// Default output frame rate for transcodes
pub const DEFAULT_FPS: u32 = 30;
/// Default CRF (Constant Rate Factor) for transcodes
pub const DEFAULT_CRF: u8 = 23;
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "veryfast";
/// Default encoder thread cap
pub const DEFAULT_THREADS: u32 = 2;
/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Protocols the tool may open while reading the source.
pub const DEFAULT_PROTOCOL_WHITELIST: &str = "file,http,https,tcp,tls,crypto";
/// Default upstream read timeout in seconds
pub const DEFAULT_RW_TIMEOUT_SECS: u64 = 15;
/// Default reconnect back-off cap in seconds
pub const DEFAULT_RECONNECT_DELAY_MAX_SECS: u32 = 5;
/// Default identifying user agent
pub const DEFAULT_USER_AGENT: &str = concat!("vodclip/", env!("CARGO_PKG_VERSION"));

/// How the output reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Fragmented output piped to the response as it is produced
    #[default]
    Streamed,
    /// Output written to a scratch file, then sent with an exact length
    Buffered,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Streamed => "streamed",
            DeliveryMode::Buffered => "buffered",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" | "streamed" => Ok(DeliveryMode::Streamed),
            "buffer" | "buffered" | "file" => Ok(DeliveryMode::Buffered),
            other => Err(format!("unknown delivery mode: {}", other)),
        }
    }
}

/// Whether the tool copies or re-encodes streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodecProfile {
    /// Stream copy with an audio bitstream fix-up
    #[default]
    Remux,
    /// Full re-encode to [`TranscodeSettings`]
    Transcode,
}

impl CodecProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecProfile::Remux => "remux",
            CodecProfile::Transcode => "transcode",
        }
    }
}

impl fmt::Display for CodecProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "remux" | "copy" => Ok(CodecProfile::Remux),
            "transcode" | "encode" => Ok(CodecProfile::Transcode),
            other => Err(format!("unknown codec profile: {}", other)),
        }
    }
}

/// Constrained re-encode profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeSettings {
    /// Output width cap; narrower sources keep their width
    pub max_width: u32,
    /// Fixed output frame rate
    pub fps: u32,
    /// Constant Rate Factor (quality, 0-51, lower is better)
    pub crf: u8,
    /// Encoding preset (e.g., "veryfast", "medium")
    pub preset: String,
    /// Encoder thread cap
    pub threads: u32,
    /// Video codec
    pub codec: String,
    /// Audio codec
    pub audio_codec: String,
    /// Audio bitrate
    pub audio_bitrate: String,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            fps: DEFAULT_FPS,
            crf: DEFAULT_CRF,
            preset: DEFAULT_PRESET.to_string(),
            threads: DEFAULT_THREADS,
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

impl TranscodeSettings {
    /// Scale + frame rate filter.
    ///
    /// Width is capped and rounded down to even; `-2` keeps the aspect ratio
    /// with an even height.
    pub fn video_filter(&self) -> String {
        format!(
            "scale='trunc(min({},iw)/2)*2':-2,fps={}",
            self.max_width, self.fps
        )
    }

    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-vf".to_string(),
            self.video_filter(),
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-threads".to_string(),
            self.threads.to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]
    }
}

/// Input-side options that let the tool ride out origin hiccups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkResilience {
    /// Reconnect on errors and dropped streams
    pub reconnect: bool,
    /// Reconnect back-off cap in seconds
    pub reconnect_delay_max_secs: u32,
    /// Read/write timeout in seconds
    pub rw_timeout_secs: u64,
    /// Allowed protocols
    pub protocol_whitelist: String,
    /// User agent sent to the origin
    pub user_agent: String,
    /// Optional referer header sent to the origin
    pub referer: Option<String>,
}

impl Default for NetworkResilience {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_delay_max_secs: DEFAULT_RECONNECT_DELAY_MAX_SECS,
            rw_timeout_secs: DEFAULT_RW_TIMEOUT_SECS,
            protocol_whitelist: DEFAULT_PROTOCOL_WHITELIST.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: None,
        }
    }
}

impl NetworkResilience {
    /// Convert to FFmpeg input arguments (placed before `-i`).
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.reconnect {
            args.extend(
                [
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_on_network_error",
                    "1",
                    "-reconnect_delay_max",
                ]
                .map(String::from),
            );
            args.push(self.reconnect_delay_max_secs.to_string());
        }

        // FFmpeg expects microseconds
        args.push("-rw_timeout".to_string());
        args.push((self.rw_timeout_secs * 1_000_000).to_string());

        args.push("-protocol_whitelist".to_string());
        args.push(self.protocol_whitelist.clone());

        args.push("-user_agent".to_string());
        args.push(self.user_agent.clone());

        if let Some(referer) = &self.referer {
            args.push("-headers".to_string());
            args.push(format!("Referer: {}\r\n", referer));
        }

        args
    }
}

/// Everything that decides how one clip is produced and delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClipPlan {
    pub delivery_mode: DeliveryMode,
    pub codec_profile: CodecProfile,
    #[serde(default)]
    pub transcode: TranscodeSettings,
    #[serde(default)]
    pub network: NetworkResilience,
}

impl ClipPlan {
    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn with_codec_profile(mut self, profile: CodecProfile) -> Self {
        self.codec_profile = profile;
        self
    }

    /// Only streamed delivery has a caller waiting on the first byte.
    pub fn watchdog_applies(&self) -> bool {
        self.delivery_mode == DeliveryMode::Streamed
    }
}
