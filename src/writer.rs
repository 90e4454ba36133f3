//! The single consumer that commits chunks to disk.
use crate::config::RetryPolicy;
use crate::error::{DownloadError, Result};
use crate::metadata::DownloadMetadata;
use crate::observer::ProgressObserver;
use crate::state;
use crate::worker::Chunk;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, error, warn};

/// Shared handle to the metadata of a running download.
pub type SharedMetadata = Arc<Mutex<DownloadMetadata>>;

pub(crate) fn lock_metadata(metadata: &SharedMetadata) -> MutexGuard<'_, DownloadMetadata> {
    metadata.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drains the chunk queue into the destination file.
///
/// Every chunk is written at its own offset and synced, then the progress is
/// advanced and persisted before the next chunk is taken, so the metadata file
/// never claims bytes that are not on disk.
pub struct FileWriter {
    output: PathBuf,
    metadata_path: PathBuf,
    metadata: SharedMetadata,
    receiver: Receiver<Chunk>,
    observer: Arc<dyn ProgressObserver>,
    retry: RetryPolicy,
    last_percent: Option<u8>,
}

impl FileWriter {
    pub fn new(
        output: PathBuf,
        metadata_path: PathBuf,
        metadata: SharedMetadata,
        receiver: Receiver<Chunk>,
        observer: Arc<dyn ProgressObserver>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            output,
            metadata_path,
            metadata,
            receiver,
            observer,
            retry,
            last_percent: None,
        }
    }

    /// Runs until the metadata reports the download complete.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Incomplete`] if every worker hung up first, or
    /// [`DownloadError::RetriesExhausted`] when a bounded retry policy gives up
    /// on a disk failure.
    pub fn run(mut self) -> Result<()> {
        loop {
            let (complete, downloaded, total) = {
                let md = lock_metadata(&self.metadata);
                (md.is_complete(), md.bytes_downloaded(), md.total_file_size())
            };
            if complete {
                debug!("All {total} bytes committed, writer exiting");
                return Ok(());
            }

            let Ok(chunk) = self.receiver.recv() else {
                error!("All range workers stopped with {downloaded} of {total} bytes committed");
                return Err(DownloadError::Incomplete { downloaded, total });
            };

            self.commit(&chunk)?;
        }
    }

    fn commit(&mut self, chunk: &Chunk) -> Result<()> {
        if let Err(e) = lock_metadata(&self.metadata).range_for_chunk(chunk.offset, chunk.length()) {
            warn!("Dropping chunk: {e}");
            return Ok(());
        }

        let output = self.output.clone();
        with_retry(self.retry, "write chunk", || {
            write_at(&output, chunk.offset, &chunk.data)
        })?;

        let snapshot = {
            let mut md = lock_metadata(&self.metadata);
            md.record_written(chunk.offset, chunk.length())?;
            md.progress().clone()
        };

        let metadata_path = self.metadata_path.clone();
        with_retry(self.retry, "persist metadata", || {
            state::save_progress(&snapshot, &metadata_path)
        })?;

        self.observer.inc(chunk.length());
        self.report_progress();
        Ok(())
    }

    fn report_progress(&mut self) {
        let percent = lock_metadata(&self.metadata).completion_percentage();
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            self.observer.percent(percent);
        }
    }
}

/// Writes `data` at `offset` and syncs it before closing the file.
pub fn write_at(path: &Path, offset: u64, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().create(true).write(true).truncate(false).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    file.sync_data()?;
    Ok(())
}

/// Repeats `op` with the policy's backoff until it succeeds or the policy
/// gives up.
fn with_retry<T>(policy: RetryPolicy, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if policy.allows(attempt) => {
                warn!("Failed to {what}: {e}. Retrying in {:?}...", policy.backoff);
                thread::sleep(policy.backoff);
            }
            Err(e) => {
                error!("Failed to {what} after {attempt} attempts: {e}");
                return Err(DownloadError::RetriesExhausted {
                    attempts: attempt,
                    last_error: e.to_string(),
                });
            }
        }
    }
}
