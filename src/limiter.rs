//! Periodic refill of the shared token bucket.
use crate::bucket::TokenBucket;
use crate::config::RefillMode;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Refills a [`TokenBucket`] every `interval` until the bucket is terminated.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    bucket: Arc<TokenBucket>,
    max_bytes_per_second: u64,
    mode: RefillMode,
    interval: Duration,
}

impl RateLimiter {
    pub fn new(
        bucket: Arc<TokenBucket>,
        max_bytes_per_second: u64,
        mode: RefillMode,
        interval: Duration,
    ) -> Self {
        Self {
            bucket,
            max_bytes_per_second,
            mode,
            interval,
        }
    }

    /// Runs the refill loop on a dedicated thread.
    ///
    /// After [`TokenBucket::terminate`], unpark the returned thread to make it
    /// exit without waiting for the rest of the current interval.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("rate-limiter".to_string())
            .spawn(move || self.run())
    }

    pub fn run(&self) {
        debug!(
            rate = self.max_bytes_per_second,
            mode = ?self.mode,
            "Rate limiter started"
        );
        while !self.bucket.is_terminated() {
            self.refill();
            self.pause();
        }
        info!("Rate limiter stopped");
    }

    fn refill(&self) {
        match self.mode {
            RefillMode::Soft => self.bucket.add(self.max_bytes_per_second),
            RefillMode::Hard => self.bucket.set(self.max_bytes_per_second),
        }
    }

    fn pause(&self) {
        let deadline = Instant::now() + self.interval;
        while !self.bucket.is_terminated() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
    }
}
