// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Segmenter: splits one source file into fixed-duration MPEG-TS chunks.
//!
//! The heavy lifting is done by `ffmpeg`'s segment muxer in stream-copy mode.
//! Output goes to a staging directory first:
//!
//! ```text
//! ffmpeg ──→ <dir>/.staging/segment000.ts …   + chunks.csv
//!                    │ validate (contiguous indices, real durations)
//!                    ▼ fsync + rename
//!            <dir>/segment000.ts …
//! ```
//!
//! Nothing is visible in the published directory until the tool exited
//! successfully and every chunk was checked, so a reader never sees a
//! half-written chunk or a partial chunk set.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{Config, SegmenterConfig};
use crate::error::{Result, SegError};

const CHUNK_PREFIX: &str = "segment";
const CHUNK_SUFFIX: &str = ".ts";
const STAGING_DIR: &str = ".staging";
const SEGMENT_LIST: &str = "chunks.csv";

/// One published chunk file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Zero-based position in playback order.
    pub index: u32,
    pub path: PathBuf,
    /// Measured duration in seconds, always > 0.
    pub duration: f64,
}

impl Chunk {
    pub fn file_name(&self) -> String {
        chunk_file_name(self.index)
    }
}

/// `segment000.ts`, `segment001.ts`, … (the tool widens past 999).
pub fn chunk_file_name(index: u32) -> String {
    format!("{CHUNK_PREFIX}{index:03}{CHUNK_SUFFIX}")
}

/// Inverse of [`chunk_file_name`]. Returns `None` for anything that is not a chunk.
pub fn parse_chunk_index(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(CHUNK_PREFIX)?.strip_suffix(CHUNK_SUFFIX)?;
    if digits.len() < 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// A single segmentation request. Consumed by [`Segmenter::run`].
#[derive(Debug, Clone)]
pub struct SegmentationJob {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    /// Target chunk duration in seconds.
    pub chunk_duration: f64,
}

impl SegmentationJob {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: config.source.path.clone(),
            output_dir: config.segments.dir.clone(),
            chunk_duration: config.segments.chunk_duration_secs,
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.output_dir.join(STAGING_DIR)
    }
}

/// Runs the external tool and publishes its output.
#[derive(Debug, Clone)]
pub struct Segmenter {
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl Segmenter {
    pub fn new(config: &SegmenterConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Segment `job.source` into `job.output_dir`.
    ///
    /// Returns the published chunks ordered by index. An empty vector means
    /// the tool succeeded without producing any chunk.
    pub async fn run(&self, job: SegmentationJob) -> Result<Vec<Chunk>> {
        let meta = tokio::fs::metadata(&job.source)
            .await
            .map_err(|e| SegError::fs(&job.source, e))?;
        if !meta.is_file() {
            return Err(SegError::fs(
                &job.source,
                std::io::Error::new(ErrorKind::InvalidInput, "source is not a regular file"),
            ));
        }

        tokio::fs::create_dir_all(&job.output_dir)
            .await
            .map_err(|e| SegError::fs(&job.output_dir, e))?;

        let staging = job.staging_dir();
        remove_dir_if_present(&staging).await?;
        tokio::fs::create_dir(&staging)
            .await
            .map_err(|e| SegError::fs(&staging, e))?;

        info!(
            source = ?job.source,
            output = ?job.output_dir,
            chunk_secs = job.chunk_duration,
            "Segmentation started"
        );

        let result = match self.run_tool(&job, &staging).await {
            Ok(()) => match collect_staged(&staging).await {
                Ok(staged) => publish(&staged, &job.output_dir).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = remove_dir_if_present(&staging).await {
            warn!(error = %e, "Failed to remove staging directory");
        }

        let chunks = result?;
        info!(
            chunks = chunks.len(),
            total_secs = chunks.iter().map(|c| c.duration).sum::<f64>(),
            "Segmentation complete"
        );
        Ok(chunks)
    }

    /// Command-line arguments for one run writing into `staging`.
    pub fn args(&self, job: &SegmentationJob, staging: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(job.source.clone().into_os_string());
        // Video and audio only; data and subtitle tracks do not fit MPEG-TS chunks.
        for a in ["-map", "0:v", "-map", "0:a?", "-c", "copy", "-f", "segment", "-segment_time"] {
            args.push(a.into());
        }
        args.push(job.chunk_duration.to_string().into());
        for a in ["-segment_format", "mpegts", "-reset_timestamps", "1", "-segment_list"] {
            args.push(a.into());
        }
        args.push(staging.join(SEGMENT_LIST).into_os_string());
        args.push("-segment_list_type".into());
        args.push("csv".into());
        args.push(staging.join(format!("{CHUNK_PREFIX}%03d{CHUNK_SUFFIX}")).into_os_string());
        args
    }

    async fn run_tool(&self, job: &SegmentationJob, staging: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(self.args(job, staging))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| SegError::SegmentationFailure {
            status: None,
            stderr: format!("cannot start {:?}: {e}", self.ffmpeg),
        })?;

        // On timeout the child is dropped, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SegError::SegmentationFailure {
                    status: None,
                    stderr: format!("waiting for {:?}: {e}", self.ffmpeg),
                })
            }
            Err(_) => {
                return Err(SegError::SegmentationTimeout { secs: self.timeout.as_secs() })
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(SegError::SegmentationFailure { status: output.status.code(), stderr });
        }
        if !stderr.is_empty() {
            debug!(stderr = %stderr, "Segmenter diagnostics");
        }
        Ok(())
    }
}

/// Read the tool's segment list and match it against the staged files.
async fn collect_staged(staging: &Path) -> Result<Vec<Chunk>> {
    let list_path = staging.join(SEGMENT_LIST);
    let durations = match tokio::fs::read_to_string(&list_path).await {
        Ok(text) => parse_segment_list(&text)?,
        Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => return Err(SegError::fs(&list_path, e)),
    };

    let mut files: BTreeMap<u32, PathBuf> = BTreeMap::new();
    let mut entries = tokio::fs::read_dir(staging)
        .await
        .map_err(|e| SegError::fs(staging, e))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| SegError::fs(staging, e))? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == SEGMENT_LIST {
            continue;
        }
        match parse_chunk_index(name) {
            Some(idx) => {
                files.insert(idx, entry.path());
            }
            None => debug!(file = name, "Ignoring unexpected file in staging directory"),
        }
    }

    if files.len() != durations.len() {
        return Err(SegError::InconsistentOutput(format!(
            "{} chunk files but {} segment list entries",
            files.len(),
            durations.len()
        )));
    }

    let mut chunks = Vec::with_capacity(files.len());
    for (expected, (idx, path)) in files.into_iter().enumerate() {
        if idx as usize != expected {
            return Err(SegError::InconsistentOutput(format!(
                "chunk index {idx} found where {expected} was expected"
            )));
        }
        let duration = *durations.get(&idx).ok_or_else(|| {
            SegError::InconsistentOutput(format!("{} missing from segment list", chunk_file_name(idx)))
        })?;
        chunks.push(Chunk { index: idx, path, duration });
    }
    Ok(chunks)
}

/// Parse the segment muxer's CSV list: `name,start,end` per line.
fn parse_segment_list(text: &str) -> Result<BTreeMap<u32, f64>> {
    let mut out = BTreeMap::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let bad = |reason: &str| SegError::InconsistentOutput(format!("segment list line {}: {reason}", n + 1));

        let mut fields = line.rsplitn(3, ',');
        let end = fields.next().and_then(|v| v.trim().parse::<f64>().ok());
        let start = fields.next().and_then(|v| v.trim().parse::<f64>().ok());
        let name = fields.next().map(|v| v.trim().trim_matches('"'));
        let (Some(end), Some(start), Some(name)) = (end, start, name) else {
            return Err(bad("expected name,start,end"));
        };

        let base = Path::new(name).file_name().and_then(|b| b.to_str()).unwrap_or(name);
        let idx = parse_chunk_index(base).ok_or_else(|| bad("not a chunk file name"))?;
        let duration = end - start;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(bad("non-positive duration"));
        }
        if out.insert(idx, duration).is_some() {
            return Err(bad("duplicate chunk"));
        }
    }
    Ok(out)
}

/// Move validated chunks from staging into `output_dir`, replacing any
/// chunks left over from an earlier run.
async fn publish(staged: &[Chunk], output_dir: &Path) -> Result<Vec<Chunk>> {
    let mut entries = tokio::fs::read_dir(output_dir)
        .await
        .map_err(|e| SegError::fs(output_dir, e))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| SegError::fs(output_dir, e))? {
        let stale = entry.file_name().to_str().and_then(parse_chunk_index).is_some();
        if stale {
            let path = entry.path();
            tokio::fs::remove_file(&path).await.map_err(|e| SegError::fs(&path, e))?;
            debug!(file = ?path, "Removed stale chunk");
        }
    }

    let mut published = Vec::with_capacity(staged.len());
    for chunk in staged {
        let file = tokio::fs::File::open(&chunk.path)
            .await
            .map_err(|e| SegError::fs(&chunk.path, e))?;
        file.sync_all().await.map_err(|e| SegError::fs(&chunk.path, e))?;
        drop(file);

        let dest = output_dir.join(chunk.file_name());
        tokio::fs::rename(&chunk.path, &dest)
            .await
            .map_err(|e| SegError::fs(&dest, e))?;
        info!(index = chunk.index, path = ?dest, duration = chunk.duration, "Chunk published");
        published.push(Chunk { index: chunk.index, path: dest, duration: chunk.duration });
    }

    sync_dir(output_dir).await?;
    Ok(published)
}

#[cfg(unix)]
pub(crate) async fn sync_dir(dir: &Path) -> Result<()> {
    let d = tokio::fs::File::open(dir).await.map_err(|e| SegError::fs(dir, e))?;
    d.sync_all().await.map_err(|e| SegError::fs(dir, e))
}

#[cfg(not(unix))]
pub(crate) async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

async fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SegError::fs(dir, e)),
    }
}
