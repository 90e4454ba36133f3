//! Persistent download state and helpers.
//!
//! [`DownloadProgress`] is the only structure written to disk. It is stored as
//! JSON next to the destination file so an interrupted download can pick up at
//! each range's high-water mark instead of starting over.
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// An inclusive byte interval `[start, end]` within the remote file.
///
/// A `Range` is never empty: code that needs "nothing left" uses `Option<Range>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// The first byte (0-based).
    pub start: u64,
    /// The last byte, included in the range.
    pub end: u64,
}

impl Range {
    /// Builds `[start, end]`, or `None` when `start > end`.
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// The value of the `Range` request header for this interval.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// How far one worker's range has been committed to disk.
///
/// Bytes `[start, next)` are on disk; `next` is the resume point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedRange {
    /// Planned start of the worker's range. Never changes.
    pub start: u64,
    /// High-water mark: the first byte not yet committed.
    pub next: u64,
}

impl CommittedRange {
    /// A range with nothing committed yet.
    pub fn empty_at(start: u64) -> Self {
        Self { start, next: start }
    }

    pub fn committed_len(&self) -> u64 {
        self.next.saturating_sub(self.start)
    }
}

/// Represents the persistent state of a download operation.
///
/// The footprint is one [`CommittedRange`] per worker, independent of file size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Name of the destination file, derived from the URL.
    pub filename: String,
    /// The source URL of the file.
    pub url: String,
    /// One entry per worker, in plan order.
    pub ranges: Vec<CommittedRange>,
    /// Total bytes committed across all ranges.
    pub bytes_downloaded: u64,
}

impl DownloadProgress {
    /// Fresh progress for `planned_starts.len()` workers with nothing downloaded.
    pub fn new(filename: String, url: String, planned_starts: &[u64]) -> Self {
        Self {
            filename,
            url,
            ranges: planned_starts
                .iter()
                .copied()
                .map(CommittedRange::empty_at)
                .collect(),
            bytes_downloaded: 0,
        }
    }

    /// Sum of the committed lengths of every range.
    pub fn committed_bytes(&self) -> u64 {
        self.ranges.iter().map(CommittedRange::committed_len).sum()
    }
}

/// Saves the progress atomically.
///
/// The JSON is written and synced to a temporary file in the same directory,
/// which then replaces `path` with a single rename, so readers never observe a
/// half-written metadata file.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be created, written, synced
/// or renamed into place.
pub fn save_progress(progress: &DownloadProgress, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let json = serde_json::to_vec_pretty(progress)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(&json)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Loads previously saved progress, or `None` when no metadata file exists.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or parsed.
pub fn load_progress(path: &Path) -> Result<Option<DownloadProgress>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Deletes the metadata file. A missing file is not an error.
pub fn remove_progress(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
