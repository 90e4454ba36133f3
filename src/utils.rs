//! Utility helpers used across the crate.
//!
//! Filename derivation from URLs, metadata path naming and the uniform range
//! split used to plan per-worker work.
use percent_encoding::percent_decode_str;
use sanitize_filename::sanitize;
use std::path::{Path, PathBuf};
use url::Url;

/// Suffix appended to the destination file name for the progress file.
pub const METADATA_SUFFIX: &str = ".metadata";

/// Extracts a clean filename from a URL.
///
/// 1. Parses the URL.
/// 2. Extracts the last segment of the path.
/// 3. URL-decodes it (converts %20 to space, etc.).
/// 4. Sanitizes it to remove characters invalid for the OS.
/// 5. Falls back to "output.bin" if no valid filename is found.
pub fn get_filename_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .map(|mut s| s.next_back().unwrap_or("").to_string())
        })
        .map(|s| percent_decode_str(&s).decode_utf8_lossy().to_string())
        .map(sanitize)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output.bin".to_string())
}

/// Path of the progress file that sits next to `output`.
pub fn metadata_path_for(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(METADATA_SUFFIX);
    PathBuf::from(name)
}

/// Number of workers a fresh download of `total_size` bytes can use so that
/// no planned range is empty.
pub fn effective_workers(requested: usize, total_size: u64) -> usize {
    let cap = usize::try_from(total_size.max(1)).unwrap_or(usize::MAX);
    requested.clamp(1, cap)
}

/// Start and exclusive end of worker `index`'s planned range.
///
/// Every range is `total_size / workers` bytes long; the last one absorbs the
/// remainder.
pub fn planned_bounds(index: usize, workers: usize, total_size: u64) -> (u64, u64) {
    let range_size = total_size / workers as u64;
    let start = index as u64 * range_size;
    let end = if index + 1 == workers {
        total_size
    } else {
        start + range_size
    };
    (start, end)
}
