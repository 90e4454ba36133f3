//! A byte-denominated token bucket shared by every range worker.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Upper bound on a single wait inside [`TokenBucket::take`], so a missed
/// notification delays a worker by at most this long.
const TAKE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Thread-safe flow-control gate.
///
/// Workers call [`take`](Self::take) before handing bytes to the writer; the
/// rate limiter refills the bucket once per second with either
/// [`add`](Self::add) (soft limiting) or [`set`](Self::set) (hard limiting).
#[derive(Debug)]
pub struct TokenBucket {
    available: Mutex<u64>,
    refilled: Condvar,
    terminated: AtomicBool,
}

impl TokenBucket {
    /// Creates a bucket holding `initial` tokens.
    pub fn new(initial: u64) -> Self {
        Self {
            available: Mutex::new(initial),
            refilled: Condvar::new(),
            terminated: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until `tokens` are available, then removes them.
    ///
    /// The lock is released while waiting. `take(0)` returns immediately.
    pub fn take(&self, tokens: u64) {
        if tokens == 0 {
            return;
        }

        let mut available = self.lock();
        while *available < tokens {
            available = self
                .refilled
                .wait_timeout(available, TAKE_POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *available -= tokens;
    }

    /// Adds `tokens` to whatever is already in the bucket.
    pub fn add(&self, tokens: u64) {
        let mut available = self.lock();
        *available = available.saturating_add(tokens);
        self.refilled.notify_all();
    }

    /// Replaces the bucket content with exactly `tokens`.
    pub fn set(&self, tokens: u64) {
        let mut available = self.lock();
        *available = tokens;
        self.refilled.notify_all();
    }

    /// Current number of tokens.
    pub fn available(&self) -> u64 {
        *self.lock()
    }

    /// Stops the rate limiter from refilling. Pending `take` calls are not woken.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}
