//! Progress reporting hooks.
//!
//! The writer reports through a [`ProgressObserver`] so the core never prints
//! anything itself. The binary uses [`ConsoleObserver`]; library callers can
//! pick [`LogObserver`], [`NoopObserver`] or their own implementation.
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

pub trait ProgressObserver: Send + Sync {
    /// Called once before any data moves, with the bytes already on disk.
    fn start(&self, total: u64, downloaded: u64);
    /// `delta` more bytes were committed.
    fn inc(&self, delta: u64);
    /// The whole-percent completion changed.
    fn percent(&self, percent: u8);
    /// A worker hit an error and is retrying, or gave up.
    fn message(&self, msg: String);
    fn finish(&self);
}

/// Draws an `indicatif` bar on stderr.
pub struct ConsoleObserver {
    pub pb: ProgressBar,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(
            "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ) {
            pb.set_style(style.progress_chars("=>-"));
        }
        Self { pb }
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ConsoleObserver {
    fn start(&self, total: u64, downloaded: u64) {
        self.pb.set_length(total);
        self.pb.set_position(downloaded);
    }

    fn inc(&self, delta: u64) {
        self.pb.inc(delta);
    }

    fn percent(&self, percent: u8) {
        self.pb.set_message(format!("{percent:>3}%"));
    }

    fn message(&self, msg: String) {
        self.pb.println(msg);
    }

    fn finish(&self) {
        self.pb.finish_with_message("Done");
    }
}

/// Reports percentage changes as log lines.
#[derive(Debug, Default)]
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn start(&self, total: u64, downloaded: u64) {
        info!(total, downloaded, "Download started");
    }

    fn inc(&self, _delta: u64) {}

    fn percent(&self, percent: u8) {
        info!("Downloaded so far: {percent}%");
    }

    fn message(&self, msg: String) {
        warn!("{msg}");
    }

    fn finish(&self) {
        info!("Download finished");
    }
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn start(&self, _total: u64, _downloaded: u64) {}
    fn inc(&self, _delta: u64) {}
    fn percent(&self, _percent: u8) {}
    fn message(&self, _msg: String) {}
    fn finish(&self) {}
}
