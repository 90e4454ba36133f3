//! # rangedl
//!
//! `rangedl` downloads a single HTTP resource over several connections at once
//! and survives being killed halfway through.
//!
//! - The file is split into one contiguous byte range per worker.
//! - Each [`RangeFetcher`] streams its range into [`Chunk`]s, asking a shared
//!   [`TokenBucket`] for permission before handing bytes on; a [`RateLimiter`]
//!   refills the bucket once per second.
//! - A single [`FileWriter`] writes every chunk at its final offset and
//!   persists the per-range high-water marks after each write.
//! - A new run with the same URL reads those marks back and fetches only what
//!   is missing.
//!
//! ## Example Usage
//!
//! ```no_run
//! use rangedl::{DownloadConfig, Downloader, HttpSource, LogObserver};
//! use std::sync::Arc;
//!
//! let config = DownloadConfig { workers: 4, ..DownloadConfig::default() };
//! let source = HttpSource::new(config.connect_timeout, config.read_timeout)?;
//! let downloader = Downloader::new(config, Arc::new(source), Arc::new(LogObserver));
//! let report = downloader.run("https://example.com/archive.zip")?;
//! println!("saved {}", report.output.display());
//! # Ok::<(), rangedl::DownloadError>(())
//! ```

pub mod args;
pub mod bucket;
pub mod config;
pub mod downloader;
pub mod error;
pub mod limiter;
pub mod metadata;
pub mod observer;
pub mod state;
pub mod transport;
pub mod utils;
pub mod worker;
pub mod writer;

#[cfg(test)]
mod testing;

pub use args::Args;
pub use bucket::TokenBucket;
pub use config::{DownloadConfig, RefillMode, RetryPolicy, Settings};
pub use downloader::{DownloadReport, Downloader, prepare_download};
pub use error::{DownloadError, Result};
pub use limiter::RateLimiter;
pub use metadata::DownloadMetadata;
pub use observer::{ConsoleObserver, LogObserver, NoopObserver, ProgressObserver};
pub use state::{CommittedRange, DownloadProgress, Range};
pub use transport::{HttpSource, RangeSource};
pub use worker::{Chunk, RangeFetcher};
pub use writer::FileWriter;
