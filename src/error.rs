// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Segmentation failed (exit code {status:?}): {stderr}")]
    SegmentationFailure { status: Option<i32>, stderr: String },

    #[error("Segmentation did not finish within {secs}s")]
    SegmentationTimeout { secs: u64 },

    #[error("Segmenter produced inconsistent output: {0}")]
    InconsistentOutput(String),

    #[error("Cannot build a playlist from zero chunks")]
    EmptyManifest,

    #[error("Invalid chunk set: {0}")]
    InvalidChunks(String),

    #[error("Playlist parse error on line {line}: {reason}")]
    ManifestParse { line: usize, reason: String },

    #[error("Playlist is not ready to publish: {0}")]
    NotReady(String),

    #[error("HTTP server error: {0}")]
    Serve(String),
}

impl SegError {
    /// Wrap an I/O error with the path it happened on.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SegError::Filesystem { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, SegError>;
