//! API configuration.

use std::path::PathBuf;
use std::time::Duration;

use vodclip_media::AnalyzerConfig;
use vodclip_models::{CodecProfile, NetworkResilience, TranscodeSettings};
use vodclip_progress::BusConfig;

/// Default cap on the requested window length.
pub const DEFAULT_MAX_CLIP_SECONDS: f64 = 600.0;
/// Default time the tool may take to produce its first byte.
pub const DEFAULT_WATCHDOG_SECS: u64 = 20;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second
    pub rate_limit_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Serve `/metrics`
    pub metrics_enabled: bool,
    /// Clip pipeline settings
    pub clip: ClipConfig,
    /// Job registry settings
    pub progress: BusConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            max_body_size: 64 * 1024,
            environment: "development".to_string(),
            metrics_enabled: true,
            clip: ClipConfig::default(),
            progress: BusConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("API_PORT", 8000),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["*".to_string()]),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS", 10),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", 20),
            max_body_size: env_parse("MAX_BODY_SIZE", 64 * 1024),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            clip: ClipConfig::from_env(),
            progress: BusConfig::from_env(),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

/// Clip pipeline configuration.
#[derive(Debug, Clone)]
pub struct ClipConfig {
    /// Explicit FFmpeg binary; searched on PATH when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Longest requested window accepted, in seconds
    pub max_clip_seconds: f64,
    /// First-byte deadline for streamed delivery
    pub watchdog: Duration,
    /// Where buffered output is written
    pub scratch_dir: PathBuf,
    /// Buffer every clip regardless of client
    pub force_buffered: bool,
    /// Profile used when the request does not name one
    pub default_profile: CodecProfile,
    pub transcode: TranscodeSettings,
    pub network: NetworkResilience,
    pub analyzer: AnalyzerConfig,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            max_clip_seconds: DEFAULT_MAX_CLIP_SECONDS,
            watchdog: Duration::from_secs(DEFAULT_WATCHDOG_SECS),
            scratch_dir: std::env::temp_dir().join("vodclip"),
            force_buffered: false,
            default_profile: CodecProfile::Remux,
            transcode: TranscodeSettings::default(),
            network: NetworkResilience::default(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl ClipConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let analyzer = AnalyzerConfig::from_env();

        let transcode_defaults = TranscodeSettings::default();
        let transcode = TranscodeSettings {
            max_width: env_parse("TRANSCODE_MAX_WIDTH", transcode_defaults.max_width),
            fps: env_parse("TRANSCODE_FPS", transcode_defaults.fps),
            crf: env_parse("TRANSCODE_CRF", transcode_defaults.crf),
            preset: std::env::var("TRANSCODE_PRESET").unwrap_or(transcode_defaults.preset),
            threads: env_parse("TRANSCODE_THREADS", transcode_defaults.threads),
            ..transcode_defaults
        };

        // The tool presents itself to the origin the same way the analyzer does.
        let network = NetworkResilience {
            user_agent: analyzer.user_agent.clone(),
            referer: analyzer.referer.clone(),
            ..NetworkResilience::default()
        };

        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").ok().map(PathBuf::from),
            max_clip_seconds: env_parse("MAX_CLIP_SECONDS", defaults.max_clip_seconds),
            watchdog: Duration::from_secs(env_parse("WATCHDOG_SECS", DEFAULT_WATCHDOG_SECS)),
            scratch_dir: std::env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            force_buffered: env_flag("FORCE_BUFFERED"),
            default_profile: std::env::var("CLIP_CODEC_PROFILE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_profile),
            transcode,
            network,
            analyzer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert!(!config.is_production());
        assert_eq!(config.clip.max_clip_seconds, 600.0);
        assert_eq!(config.clip.watchdog, Duration::from_secs(20));
        assert_eq!(config.clip.default_profile, CodecProfile::Remux);
        assert!(!config.clip.force_buffered);
    }
}
