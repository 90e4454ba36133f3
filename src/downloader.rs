//! Orchestration of a complete download run.
use crate::bucket::TokenBucket;
use crate::config::DownloadConfig;
use crate::error::{DownloadError, Result};
use crate::limiter::RateLimiter;
use crate::metadata::DownloadMetadata;
use crate::observer::ProgressObserver;
use crate::state::{self, DownloadProgress};
use crate::transport::RangeSource;
use crate::utils;
use crate::worker::RangeFetcher;
use crate::writer::{FileWriter, SharedMetadata, lock_metadata};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Outcome of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub output: PathBuf,
    pub total_bytes: u64,
    /// Bytes that were already on disk when this run started.
    pub resumed_bytes: u64,
    pub workers: usize,
}

/// Everything [`prepare_download`] resolved before any transfer starts.
#[derive(Debug)]
pub struct PreparedDownload {
    pub metadata: DownloadMetadata,
    pub output: PathBuf,
    pub metadata_path: PathBuf,
    pub resumed: bool,
}

/// Prepares a download by either loading an existing state or creating a new one.
///
/// 1. Derives the destination and metadata paths from the URL.
/// 2. Loads saved progress if there is any; its range count overrides `workers`.
/// 3. Probes the remote size, which is authoritative even when resuming.
/// 4. For a fresh download, pre-allocates the file and plans the ranges.
/// 5. Persists the initial metadata.
///
/// # Errors
///
/// Fails if the probe fails, if saved progress belongs to another URL or no
/// longer matches the remote size, or if the initial metadata cannot be saved.
pub fn prepare_download(
    url: &str,
    output_dir: &Path,
    workers: usize,
    source: &dyn RangeSource,
) -> Result<PreparedDownload> {
    let filename = utils::get_filename_from_url(url);
    let output = output_dir.join(&filename);
    let metadata_path = utils::metadata_path_for(&output);

    let saved = load_saved_progress(url, &output, &metadata_path)?;
    let total_size = source.probe_size(url)?;

    let (progress, resumed) = match saved {
        Some(progress) => {
            info!(
                "Resuming {filename}: {} bytes committed over {} ranges",
                progress.bytes_downloaded,
                progress.ranges.len()
            );
            (progress, true)
        }
        None => {
            let workers = utils::effective_workers(workers, total_size);
            info!("Starting {filename}: {total_size} bytes over {workers} ranges");

            if !output_dir.as_os_str().is_empty() {
                fs::create_dir_all(output_dir)?;
            }
            let file = fs::File::create(&output)?;
            file.set_len(total_size)?;

            let starts: Vec<u64> = (0..workers)
                .map(|i| utils::planned_bounds(i, workers, total_size).0)
                .collect();
            (DownloadProgress::new(filename, url.to_string(), &starts), false)
        }
    };

    let metadata = DownloadMetadata::new(progress, total_size)?;
    state::save_progress(metadata.progress(), &metadata_path)?;

    Ok(PreparedDownload {
        metadata,
        output,
        metadata_path,
        resumed,
    })
}

/// Reads the metadata file, discarding it when it cannot be used for resuming.
fn load_saved_progress(
    url: &str,
    output: &Path,
    metadata_path: &Path,
) -> Result<Option<DownloadProgress>> {
    let progress = match state::load_progress(metadata_path) {
        Ok(Some(progress)) => progress,
        Ok(None) => return Ok(None),
        Err(e) => {
            warn!("Ignoring unreadable metadata {}: {e}", metadata_path.display());
            return Ok(None);
        }
    };

    if progress.committed_bytes() != progress.bytes_downloaded {
        warn!(
            "Ignoring metadata {}: ranges commit {} bytes but {} are recorded",
            metadata_path.display(),
            progress.committed_bytes(),
            progress.bytes_downloaded
        );
        return Ok(None);
    }
    if progress.url != url {
        return Err(DownloadError::UrlMismatch {
            path: metadata_path.to_path_buf(),
            stored: progress.url,
            requested: url.to_string(),
        });
    }
    if !output.exists() {
        warn!(
            "{} is missing; discarding its metadata and starting over",
            output.display()
        );
        return Ok(None);
    }
    Ok(Some(progress))
}

/// Runs downloads with a fixed configuration, transport and progress sink.
pub struct Downloader {
    config: DownloadConfig,
    source: Arc<dyn RangeSource>,
    observer: Arc<dyn ProgressObserver>,
}

impl Downloader {
    pub fn new(
        config: DownloadConfig,
        source: Arc<dyn RangeSource>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            config,
            source,
            observer,
        }
    }

    /// Downloads `url` into the configured directory, resuming if possible.
    ///
    /// The metadata file is removed only after every byte is committed; on any
    /// error it stays behind so the next run can resume.
    pub fn run(&self, url: &str) -> Result<DownloadReport> {
        self.config.validate()?;
        let prepared = prepare_download(
            url,
            &self.config.output_dir,
            self.config.workers,
            self.source.as_ref(),
        )?;
        let PreparedDownload {
            metadata,
            output,
            metadata_path,
            ..
        } = prepared;

        let total_bytes = metadata.total_file_size();
        let resumed_bytes = metadata.bytes_downloaded();
        let workers = metadata.worker_count();
        self.observer.start(total_bytes, resumed_bytes);

        let metadata: SharedMetadata = Arc::new(Mutex::new(metadata));
        match self.transfer(url, &output, &metadata_path, &metadata) {
            Ok(()) if lock_metadata(&metadata).is_complete() => {
                state::remove_progress(&metadata_path)?;
                self.observer.finish();
                info!("Download of {} complete", output.display());
                Ok(DownloadReport {
                    output,
                    total_bytes,
                    resumed_bytes,
                    workers,
                })
            }
            Ok(()) => {
                let md = lock_metadata(&metadata);
                Err(DownloadError::Incomplete {
                    downloaded: md.bytes_downloaded(),
                    total: md.total_file_size(),
                })
            }
            Err(e) => {
                error!("Download failed, keeping {} for resume: {e}", metadata_path.display());
                Err(e)
            }
        }
    }

    /// Starts the limiter, writer and range workers, then shuts them down in
    /// order: workers, writer, bucket, limiter.
    fn transfer(
        &self,
        url: &str,
        output: &Path,
        metadata_path: &Path,
        metadata: &SharedMetadata,
    ) -> Result<()> {
        // Empty until the limiter's first refill, so the first interval gets
        // exactly one interval of budget.
        let bucket = Arc::new(TokenBucket::new(0));
        let limiter = RateLimiter::new(
            bucket.clone(),
            self.config.max_bytes_per_second,
            self.config.refill_mode,
            self.config.refill_interval,
        )
        .spawn()?;

        let result = self.run_pipeline(url, output, metadata_path, metadata, &bucket);

        bucket.terminate();
        limiter.thread().unpark();
        if limiter.join().is_err() {
            warn!("Rate limiter thread panicked");
        }
        result
    }

    fn run_pipeline(
        &self,
        url: &str,
        output: &Path,
        metadata_path: &Path,
        metadata: &SharedMetadata,
        bucket: &Arc<TokenBucket>,
    ) -> Result<()> {
        let (sender, receiver) = mpsc::channel();

        let writer = FileWriter::new(
            output.to_path_buf(),
            metadata_path.to_path_buf(),
            metadata.clone(),
            receiver,
            self.observer.clone(),
            self.config.retry,
        );
        let writer = thread::Builder::new()
            .name("file-writer".to_string())
            .spawn(move || writer.run())?;

        let read_unit = self.config.effective_read_unit();
        let mut fetchers: Vec<(usize, JoinHandle<Result<()>>)> = Vec::new();
        loop {
            let next = lock_metadata(metadata).next_unassigned_range();
            let Some((index, range)) = next else {
                break;
            };

            let fetcher = RangeFetcher::new(
                index,
                url.to_string(),
                range,
                sender.clone(),
                bucket.clone(),
                self.source.clone(),
                self.observer.clone(),
                self.config.retry,
                read_unit,
            );
            let spawned = thread::Builder::new()
                .name(format!("range-{index}"))
                .spawn(move || fetcher.run());
            match spawned {
                Ok(handle) => fetchers.push((index, handle)),
                Err(e) => {
                    // Dropping the sender lets the writer notice the shortfall.
                    drop(sender);
                    join_all(fetchers);
                    let _ = writer.join();
                    return Err(e.into());
                }
            }
        }
        // Only the workers hold senders now; the writer sees the queue close
        // once all of them are done.
        drop(sender);

        let fetch_result = join_all(fetchers);
        let write_result = writer
            .join()
            .map_err(|_| DownloadError::ThreadPanicked("file-writer".to_string()))?;

        write_result?;
        fetch_result
    }
}

/// Joins every worker and returns the first failure, if any.
fn join_all(handles: Vec<(usize, JoinHandle<Result<()>>)>) -> Result<()> {
    let mut first_error = None;
    for (index, handle) in handles {
        let outcome = handle
            .join()
            .unwrap_or_else(|_| Err(DownloadError::ThreadPanicked(format!("range-{index}"))));
        if let Err(e) = outcome {
            warn!("[Range {index}] Failed: {e}");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
