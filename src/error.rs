//! Error types shared by every stage of a download.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, DownloadError>;

/// Everything that can go wrong while preparing or running a download.
///
/// Fetch and disk errors inside the worker pool are normally retried; only the
/// variants produced by the orchestration sequence reach the caller.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The HTTP client failed to build, connect or stream.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote size could not be determined.
    #[error("Cannot determine remote file size: {0}")]
    Probe(String),

    /// The server ignored the `Range` header for a range not starting at 0.
    #[error("Server does not support byte ranges (asked for {start}-{end}, got status {status})")]
    RangeNotSupported { start: u64, end: u64, status: u16 },

    /// A range stream ended before delivering all of its bytes.
    #[error("Stream ended at offset {offset}, expected data up to {end}")]
    ShortRead { offset: u64, end: u64 },

    #[error("File I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The metadata file belongs to another URL that maps to the same filename.
    #[error("Metadata file {path:?} belongs to {stored}, not {requested}")]
    UrlMismatch {
        path: PathBuf,
        stored: String,
        requested: String,
    },

    /// The persisted progress no longer fits the freshly probed remote size.
    #[error("Remote file changed since the last run: {0}")]
    RemoteChanged(String),

    /// A chunk did not line up with any range's high-water mark.
    #[error("Chunk at offset {offset} ({length} bytes) does not extend any range")]
    UnexpectedChunk { offset: u64, length: u64 },

    /// The writer stopped while a worker still had bytes to deliver.
    #[error("File writer is gone; range worker {0} cannot deliver data")]
    WriterGone(usize),

    /// Every producer finished but the file is not fully covered.
    #[error("Download incomplete: {downloaded} of {total} bytes committed")]
    Incomplete { downloaded: u64, total: u64 },

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("{0} thread panicked")]
    ThreadPanicked(String),

    /// A setting that would stall the download, such as a zero byte rate.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The saved per-range marks do not add up to the saved byte count.
    #[error("Inconsistent metadata: {0}")]
    CorruptProgress(String),
}
