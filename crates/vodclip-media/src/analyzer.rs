//! Manifest fetcher for origin assets.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{header, Client};
use tracing::{debug, info};
use url::Url;

use vodclip_models::plan::DEFAULT_USER_AGENT;
use vodclip_models::{is_valid_asset_id, SnappedWindow};

use crate::error::{MediaError, MediaResult};
use crate::playlist::{compute_snapped_window, parse_manifest, Manifest, Playlist};

/// Default manifest location relative to the origin.
pub const DEFAULT_MANIFEST_TEMPLATE: &str = "{origin}/{asset}/index.m3u8";

/// Configuration for the playlist analyzer.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Base URL of the VOD origin
    pub origin_base_url: String,
    /// Manifest URL template with `{origin}` and `{asset}` placeholders
    pub manifest_template: String,
    /// User agent for manifest fetches
    pub user_agent: String,
    /// Optional referer for manifest fetches
    pub referer: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            origin_base_url: "http://localhost:8080".to_string(),
            manifest_template: DEFAULT_MANIFEST_TEMPLATE.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl AnalyzerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            origin_base_url: std::env::var("ORIGIN_BASE_URL")
                .unwrap_or(defaults.origin_base_url),
            manifest_template: std::env::var("MANIFEST_PATH_TEMPLATE")
                .unwrap_or(defaults.manifest_template),
            user_agent: std::env::var("CLIP_USER_AGENT").unwrap_or(defaults.user_agent),
            referer: std::env::var("CLIP_REFERER").ok().filter(|s| !s.is_empty()),
            timeout: Duration::from_secs(
                std::env::var("UPSTREAM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }
}

/// A fetched media playlist and where it came from.
#[derive(Debug, Clone)]
pub struct AnalyzedPlaylist {
    /// Media playlist URL the tool should read
    pub source_url: Url,
    pub playlist: Playlist,
    pub boundaries: Vec<f64>,
}

impl AnalyzedPlaylist {
    /// Snap a requested range against this playlist.
    pub fn snap(&self, start: f64, end: f64) -> MediaResult<SnappedWindow> {
        compute_snapped_window(&self.boundaries, start, end)
    }
}

/// Fetches and parses manifests from the origin.
#[derive(Clone)]
pub struct PlaylistAnalyzer {
    http: Client,
    config: AnalyzerConfig,
}

impl PlaylistAnalyzer {
    pub fn new(config: AnalyzerConfig) -> MediaResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| MediaError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Manifest URL for an asset.
    pub fn manifest_url(&self, asset_id: &str) -> MediaResult<Url> {
        if !is_valid_asset_id(asset_id) {
            return Err(MediaError::InvalidManifestUrl(format!(
                "invalid asset id: {}",
                asset_id
            )));
        }

        let raw = self
            .config
            .manifest_template
            .replace("{origin}", self.config.origin_base_url.trim_end_matches('/'))
            .replace("{asset}", asset_id);

        Url::parse(&raw).map_err(|e| MediaError::InvalidManifestUrl(format!("{}: {}", raw, e)))
    }

    /// Fetch the asset's manifest and derive its boundaries.
    ///
    /// A master playlist is followed once to its highest-bandwidth variant.
    pub async fn fetch_and_parse(&self, asset_id: &str) -> MediaResult<AnalyzedPlaylist> {
        let mut source_url = self.manifest_url(asset_id)?;

        let playlist = match parse_manifest(&self.fetch_bytes(&source_url).await?)? {
            Manifest::Media(playlist) => playlist,
            Manifest::Master { variant } => {
                let variant_url = source_url.join(&variant).map_err(|e| {
                    MediaError::InvalidManifestUrl(format!("variant {}: {}", variant, e))
                })?;
                debug!(master = %source_url, variant = %variant_url, "Following master playlist");
                let body = self.fetch_bytes(&variant_url).await?;
                source_url = variant_url;
                match parse_manifest(&body)? {
                    Manifest::Media(playlist) => playlist,
                    Manifest::Master { .. } => {
                        return Err(MediaError::InvalidPlaylist(format!(
                            "{} is a nested master playlist",
                            source_url
                        )))
                    }
                }
            }
        };
        let boundaries = playlist.boundaries();

        info!(
            asset_id = %asset_id,
            segments = playlist.len(),
            total_duration = playlist.total_duration(),
            "Analyzed playlist"
        );

        Ok(AnalyzedPlaylist {
            source_url,
            playlist,
            boundaries,
        })
    }

    async fn fetch_bytes(&self, url: &Url) -> MediaResult<Bytes> {
        let mut request = self.http.get(url.clone());
        if let Some(referer) = &self.config.referer {
            request = request.header(header::REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MediaError::UpstreamUnreachable(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::UpstreamStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| MediaError::UpstreamUnreachable(format!("{}: {}", url, e)))
    }
}
