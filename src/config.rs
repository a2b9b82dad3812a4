// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, SegError};

/// Top-level configuration loaded from a TOML file.
///
/// Every section is optional; a missing section falls back to the defaults
/// below, so an empty file is a valid configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// The media file to segment.
    #[serde(default)]
    pub source: SourceConfig,
    /// Chunk output and external tool parameters.
    #[serde(default)]
    pub segments: SegmenterConfig,
    /// Where the playlist is written.
    #[serde(default)]
    pub playlist: PlaylistConfig,
    /// HTTP surface.
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_path")]
    pub path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { path: default_source_path() }
    }
}

/// Segmenter parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmenterConfig {
    /// Directory the chunk files are published into.
    #[serde(default = "default_segments_dir")]
    pub dir: PathBuf,
    /// Target duration of a single chunk in seconds.
    #[serde(default = "default_chunk_duration")]
    pub chunk_duration_secs: f64,
    /// Path or name of the ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Upper bound on how long a single segmentation run may take.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            dir: default_segments_dir(),
            chunk_duration_secs: default_chunk_duration(),
            ffmpeg_path: default_ffmpeg_path(),
            timeout_secs: default_timeout(),
        }
    }
}

impl SegmenterConfig {
    /// URL path component under which chunks are served (`/<prefix>/<file>`).
    pub fn url_prefix(&self) -> Option<&str> {
        self.dir.file_name().and_then(|n| n.to_str())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlaylistConfig {
    #[serde(default = "default_playlist_path")]
    pub path: PathBuf,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self { path: default_playlist_path() }
    }
}

impl PlaylistConfig {
    /// File name the playlist is served as (`/<name>`).
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// HTTP surface configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Optional HTML template for the landing page. Re-read on every request;
    /// `{{playlist}}` is replaced with the playlist URL.
    #[serde(default)]
    pub index_template: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { listen: default_listen(), index_template: None }
    }
}

fn default_source_path() -> PathBuf { PathBuf::from("input.mp4") }
fn default_segments_dir() -> PathBuf { PathBuf::from("segments") }
fn default_chunk_duration() -> f64 { 3.0 }
fn default_ffmpeg_path() -> PathBuf { PathBuf::from("ffmpeg") }
fn default_timeout() -> u64 { 3600 }
fn default_playlist_path() -> PathBuf { PathBuf::from("playlist.m3u8") }
fn default_listen() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 8000)) }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SegError::Config(format!("Cannot read config file {path:?}: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| SegError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.path.as_os_str().is_empty() {
            return Err(SegError::Config("source.path must not be empty".into()));
        }
        let d = self.segments.chunk_duration_secs;
        if !d.is_finite() || d <= 0.0 {
            return Err(SegError::Config("segments.chunk_duration_secs must be > 0".into()));
        }
        if self.segments.timeout_secs == 0 {
            return Err(SegError::Config("segments.timeout_secs must be > 0".into()));
        }
        let prefix = self.segments.url_prefix().ok_or_else(|| {
            SegError::Config(format!("segments.dir {:?} has no usable directory name", self.segments.dir))
        })?;
        let name = self.playlist.file_name().ok_or_else(|| {
            SegError::Config(format!("playlist.path {:?} has no usable file name", self.playlist.path))
        })?;
        for (key, value) in [("segments.dir", prefix), ("playlist.path", name)] {
            if !is_url_safe(value) {
                return Err(SegError::Config(format!(
                    "{key} name {value:?} may only use letters, digits, '-', '.', '_' and '~'"
                )));
            }
        }
        if prefix == name || name == "status" {
            return Err(SegError::Config(format!("playlist name {name:?} collides with another route")));
        }
        Ok(())
    }
}

/// Names that appear in URLs and route paths unescaped (RFC 3986 unreserved).
fn is_url_safe(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.segments.dir, PathBuf::from("segments"));
        assert_eq!(cfg.segments.chunk_duration_secs, 3.0);
        assert_eq!(cfg.playlist.file_name(), Some("playlist.m3u8"));
        assert_eq!(cfg.segments.url_prefix(), Some("segments"));
        assert_eq!(cfg.http.listen.port(), 8000);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = Config::from_toml(
            r#"
            [source]
            path = "files/clip.mp4"

            [segments]
            dir = "out/chunks"
            chunk_duration_secs = 6.0
            timeout_secs = 60

            [http]
            listen = "127.0.0.1:9000"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.source.path, PathBuf::from("files/clip.mp4"));
        assert_eq!(cfg.segments.url_prefix(), Some("chunks"));
        assert_eq!(cfg.segments.timeout_secs, 60);
        assert_eq!(cfg.http.listen, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn rejects_non_positive_duration() {
        let err = Config::from_toml("[segments]\nchunk_duration_secs = 0.0\n").unwrap_err();
        assert!(matches!(err, SegError::Config(_)));
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(Config::from_toml("[segments]\ntimeout_secs = 0\n").is_err());
    }

    #[test]
    fn rejects_bad_listen_address() {
        assert!(Config::from_toml("[http]\nlisten = \"not-an-address\"\n").is_err());
    }

    #[test]
    fn rejects_colliding_routes() {
        let err = Config::from_toml("[playlist]\npath = \"segments\"\n").unwrap_err();
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn rejects_route_syntax_in_names() {
        for bad in [":live.m3u8", "*all.m3u8", "{name}.m3u8"] {
            let toml = format!("[playlist]\npath = {bad:?}\n");
            let err = Config::from_toml(&toml).unwrap_err();
            assert!(matches!(err, SegError::Config(_)), "{bad} accepted");
        }
        assert!(Config::from_toml("[segments]\ndir = \"out/:chunks\"\n").is_err());
    }

    #[test]
    fn rejects_names_needing_percent_encoding() {
        assert!(Config::from_toml("[segments]\ndir = \"videos/my segs\"\n").is_err());
        assert!(Config::from_toml("[playlist]\npath = \"a&b.m3u8\"\n").is_err());
        assert!(Config::from_toml("[playlist]\npath = \"caf\u{00e9}.m3u8\"\n").is_err());
        let cfg = Config::from_toml("[segments]\ndir = \"/srv/my_segs-2.v~1\"\n").unwrap();
        assert_eq!(cfg.segments.url_prefix(), Some("my_segs-2.v~1"));
    }
}
