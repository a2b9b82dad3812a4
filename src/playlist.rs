// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HLS media playlist generation (VOD) and the matching parser.
//!
//! ```text
//! #EXTM3U
//! #EXT-X-VERSION:3
//! #EXT-X-TARGETDURATION:3
//! #EXT-X-MEDIA-SEQUENCE:0
//! #EXT-X-PLAYLIST-TYPE:VOD
//! #EXTINF:3.000,
//! segments/segment000.ts
//! ...
//! #EXT-X-ENDLIST
//! ```

use std::fmt::Write as FmtWrite;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, SegError};
use crate::segmenter::{sync_dir, Chunk};

/// MIME type the playlist is served with.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/x-mpegURL";

const HEADER_TAG: &str = "#EXTM3U";
const EXTINF_TAG: &str = "#EXTINF:";
const PROTOCOL_VERSION: u8 = 3;

/// One `#EXTINF` + URI pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub duration: f64,
    pub uri: String,
}

/// A complete, non-empty media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub version: u8,
    pub target_duration: u64,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a playlist for `chunks`, which must be in index order starting at 0.
    ///
    /// Chunk URIs are `<uri_prefix>/<file name>`, resolved by players relative
    /// to the playlist URL.
    pub fn build(chunks: &[Chunk], uri_prefix: &str) -> Result<Self> {
        if chunks.is_empty() {
            return Err(SegError::EmptyManifest);
        }

        let mut entries = Vec::with_capacity(chunks.len());
        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.index as usize != expected {
                return Err(SegError::InvalidChunks(format!(
                    "chunk index {} at position {expected}",
                    chunk.index
                )));
            }
            if !chunk.duration.is_finite() || chunk.duration <= 0.0 {
                return Err(SegError::InvalidChunks(format!(
                    "chunk {} has duration {}",
                    chunk.index, chunk.duration
                )));
            }
            let uri = match uri_prefix.trim_matches('/') {
                "" => chunk.file_name(),
                prefix => format!("{prefix}/{}", chunk.file_name()),
            };
            // Stored at the precision it is rendered with, so the target
            // duration is derived from the values players actually see.
            let duration = ((chunk.duration * 1000.0).round() / 1000.0).max(0.001);
            entries.push(ManifestEntry { duration, uri });
        }

        let longest = entries.iter().map(|e| e.duration).fold(0.0_f64, f64::max);
        Ok(Self {
            version: PROTOCOL_VERSION,
            // EXTINF values rounded to the nearest integer must not exceed it.
            target_duration: longest.round().max(1.0) as u64,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.entries.iter().map(|e| e.duration).sum()
    }

    /// Render the playlist text.
    pub fn render(&self) -> String {
        let mut m3u8 = String::with_capacity(128 + self.entries.len() * 48);
        // Writing into a String cannot fail.
        let _ = writeln!(m3u8, "{HEADER_TAG}");
        let _ = writeln!(m3u8, "#EXT-X-VERSION:{}", self.version);
        let _ = writeln!(m3u8, "#EXT-X-TARGETDURATION:{}", self.target_duration);
        let _ = writeln!(m3u8, "#EXT-X-MEDIA-SEQUENCE:0");
        let _ = writeln!(m3u8, "#EXT-X-PLAYLIST-TYPE:VOD");
        for e in &self.entries {
            let _ = writeln!(m3u8, "{EXTINF_TAG}{:.3},", e.duration);
            let _ = writeln!(m3u8, "{}", e.uri);
        }
        let _ = writeln!(m3u8, "#EXT-X-ENDLIST");
        m3u8
    }

    /// Write the rendered playlist to `path` via a temporary file + rename,
    /// so `path` either holds the previous contents or the complete new ones.
    pub async fn write_atomic(&self, path: &Path) -> Result<()> {
        let text = self.render();
        let tmp = temp_path(path);
        let target = path.to_path_buf();

        let write = {
            let tmp = tmp.clone();
            tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                let mut f = std::fs::File::create(&tmp)?;
                f.write_all(text.as_bytes())?;
                f.sync_all()?;
                std::fs::rename(&tmp, &target)
            })
        };
        let outcome = match write.await {
            Ok(r) => r,
            Err(e) => Err(std::io::Error::other(e)),
        };
        if let Err(e) = outcome {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SegError::fs(path, e));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            sync_dir(parent).await?;
        }
        info!(path = ?path, chunks = self.len(), total_secs = self.total_duration(), "Playlist written");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Parse playlist text back into its ordered entries.
///
/// Tags other than `#EXTINF` are skipped, as are blank lines and comments.
pub fn parse_entries(text: &str) -> Result<Vec<ManifestEntry>> {
    let mut lines = text.lines().enumerate().map(|(n, l)| (n + 1, l.trim()));

    match lines.next() {
        Some((_, HEADER_TAG)) => {}
        _ => {
            return Err(SegError::ManifestParse { line: 1, reason: format!("expected {HEADER_TAG}") })
        }
    }

    let mut entries = Vec::new();
    let mut pending: Option<(usize, f64)> = None;
    for (n, line) in lines {
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix(EXTINF_TAG) {
            if pending.is_some() {
                return Err(SegError::ManifestParse { line: n, reason: "#EXTINF without URI".into() });
            }
            let value = rest.split(',').next().unwrap_or_default().trim();
            let duration = value.parse::<f64>().map_err(|_| SegError::ManifestParse {
                line: n,
                reason: format!("bad duration {value:?}"),
            })?;
            pending = Some((n, duration));
        } else if line.starts_with('#') {
            continue;
        } else {
            let Some((_, duration)) = pending.take() else {
                return Err(SegError::ManifestParse { line: n, reason: "URI without #EXTINF".into() });
            };
            entries.push(ManifestEntry { duration, uri: line.to_string() });
        }
    }

    if let Some((n, _)) = pending {
        return Err(SegError::ManifestParse { line: n, reason: "#EXTINF without URI".into() });
    }
    Ok(entries)
}

/// Ordered chunk URIs of a playlist.
pub fn parse_chunk_uris(text: &str) -> Result<Vec<String>> {
    Ok(parse_entries(text)?.into_iter().map(|e| e.uri).collect())
}
