//! Range workers: stream one byte range into chunks for the file writer.
use crate::bucket::TokenBucket;
use crate::config::RetryPolicy;
use crate::error::{DownloadError, Result};
use crate::observer::ProgressObserver;
use crate::state::Range;
use crate::transport::RangeSource;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;
use tracing::{debug, info, warn};

/// Downloaded bytes on their way to the file writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Where `data` starts in the destination file.
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn length(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Fetches a single assigned range, retrying from the first byte not yet
/// handed to the writer.
pub struct RangeFetcher {
    index: usize,
    url: String,
    range: Range,
    sender: Sender<Chunk>,
    bucket: Arc<TokenBucket>,
    source: Arc<dyn RangeSource>,
    observer: Arc<dyn ProgressObserver>,
    retry: RetryPolicy,
    read_unit: usize,
}

impl RangeFetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        url: String,
        range: Range,
        sender: Sender<Chunk>,
        bucket: Arc<TokenBucket>,
        source: Arc<dyn RangeSource>,
        observer: Arc<dyn ProgressObserver>,
        retry: RetryPolicy,
        read_unit: usize,
    ) -> Self {
        Self {
            index,
            url,
            range,
            sender,
            bucket,
            source,
            observer,
            retry,
            read_unit: read_unit.max(1),
        }
    }

    /// Downloads the range, retrying after every failure.
    ///
    /// Returns once the last byte of the range has been queued, when the writer
    /// has gone away, or when the retry policy gives up.
    pub fn run(self) -> Result<()> {
        let id = self.index;
        let mut remaining = Some(self.range);
        let mut attempt = 0;

        info!("[Range {id}] Starting {}-{}", self.range.start, self.range.end);

        while let Some(range) = remaining {
            attempt += 1;
            if attempt > 1 {
                debug!("[Range {id}] Attempt #{attempt} for {}-{}", range.start, range.end);
            }

            let mut sent = 0;
            let result = self.fetch(range, &mut sent);

            // Whatever was queued is kept; only the tail is fetched again.
            remaining = Range::new(range.start + sent, range.end);

            match result {
                Ok(()) => {}
                Err(e @ DownloadError::WriterGone(_)) => return Err(e),
                Err(e) => {
                    if !self.retry.allows(attempt) {
                        warn!("[Range {id}] Giving up after {attempt} attempts: {e}");
                        self.observer.message(format!("[Range {id}] Failed: {e}"));
                        return Err(DownloadError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    self.observer.message(format!(
                        "[Range {id}] Error: {e}. Retrying {}-{} in {:?}...",
                        range.start + sent,
                        range.end,
                        self.retry.backoff
                    ));
                    thread::sleep(self.retry.backoff);
                }
            }
        }

        info!("[Range {id}] Done");
        Ok(())
    }

    /// One attempt: streams `range`, counting queued bytes in `sent`.
    fn fetch(&self, range: Range, sent: &mut u64) -> Result<()> {
        let mut stream = self.source.fetch_range(&self.url, range)?;
        let mut buffer = vec![0u8; self.read_unit];

        while *sent < range.len() {
            let read = match stream.read(&mut buffer) {
                Ok(0) => {
                    return Err(DownloadError::ShortRead {
                        offset: range.start + *sent,
                        end: range.end,
                    });
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            // Servers that ignore the requested end may send too much.
            let wanted = (range.len() - *sent).min(read as u64);
            self.bucket.take(wanted);

            let chunk = Chunk {
                offset: range.start + *sent,
                data: buffer[..wanted as usize].to_vec(),
            };
            self.sender
                .send(chunk)
                .map_err(|_| DownloadError::WriterGone(self.index))?;
            *sent += wanted;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RefillMode;
    use crate::limiter::RateLimiter;
    use crate::observer::NoopObserver;
    use crate::testing::{FlakySource, MemorySource, MessageLog};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: None,
            backoff: Duration::from_millis(10),
        }
    }

    fn collect(rx: mpsc::Receiver<Chunk>) -> Vec<Chunk> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_streams_range_in_read_units() {
        let source = Arc::new(MemorySource::patterned(1000));
        let (tx, rx) = mpsc::channel();
        let bucket = Arc::new(TokenBucket::new(u64::MAX / 2));

        let fetcher = RangeFetcher::new(
            1,
            "mem://file".into(),
            Range::new(250, 499).unwrap(),
            tx,
            bucket.clone(),
            source.clone(),
            Arc::new(NoopObserver),
            policy(),
            100,
        );
        fetcher.run().unwrap();

        let chunks = collect(rx);
        let offsets: Vec<u64> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![250, 350, 450]);
        assert_eq!(chunks[2].length(), 50);

        let bytes: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(bytes, source.data()[250..500]);
        assert_eq!(bucket.available(), u64::MAX / 2 - 250);
    }

    #[test]
    fn test_failure_narrows_to_the_unsent_tail() {
        // Fails once after delivering 60 bytes of [0, 249].
        let source = Arc::new(FlakySource::new(MemorySource::patterned(1000), 60));
        let messages = Arc::new(MessageLog::default());
        let (tx, rx) = mpsc::channel();

        let fetcher = RangeFetcher::new(
            0,
            "mem://file".into(),
            Range::new(0, 249).unwrap(),
            tx,
            Arc::new(TokenBucket::new(u64::MAX / 2)),
            source.clone(),
            messages.clone(),
            policy(),
            20,
        );
        fetcher.run().unwrap();

        assert_eq!(
            source.requests(),
            vec![Range::new(0, 249).unwrap(), Range::new(60, 249).unwrap()]
        );

        let chunks = collect(rx);
        let mut expected = 0;
        for chunk in &chunks {
            assert_eq!(chunk.offset, expected, "no byte is sent twice");
            expected += chunk.length();
        }
        assert_eq!(expected, 250);

        let notices = messages.messages();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].starts_with("[Range 0] Error:"), "{notices:?}");
        assert!(notices[0].contains("Retrying 60-249"), "{notices:?}");
    }

    #[test]
    fn test_bounded_retries_give_up() {
        let source = Arc::new(FlakySource::always_failing(MemorySource::patterned(100)));
        let (tx, _rx) = mpsc::channel();

        let fetcher = RangeFetcher::new(
            0,
            "mem://file".into(),
            Range::new(0, 99).unwrap(),
            tx,
            Arc::new(TokenBucket::new(1_000)),
            source.clone(),
            Arc::new(NoopObserver),
            RetryPolicy {
                max_attempts: Some(3),
                backoff: Duration::ZERO,
            },
            4096,
        );

        let err = fetcher.run().unwrap_err();
        assert!(matches!(err, DownloadError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(source.requests().len(), 3);
    }

    #[test]
    fn test_stops_when_the_writer_is_gone() {
        let source = Arc::new(MemorySource::patterned(100));
        let (tx, rx) = mpsc::channel();
        drop(rx);

        let fetcher = RangeFetcher::new(
            4,
            "mem://file".into(),
            Range::new(0, 99).unwrap(),
            tx,
            Arc::new(TokenBucket::new(1_000)),
            source,
            Arc::new(NoopObserver),
            policy(),
            10,
        );
        assert!(matches!(fetcher.run(), Err(DownloadError::WriterGone(4))));
    }

    /// Runs one fetcher behind a live limiter and records when each chunk
    /// arrived, relative to the limiter's start.
    fn fetch_throttled(
        total: usize,
        rate: u64,
        mode: RefillMode,
        interval: Duration,
        read_unit: usize,
    ) -> (Vec<(Duration, u64)>, Duration) {
        let source = Arc::new(MemorySource::patterned(total));
        let bucket = Arc::new(TokenBucket::new(0));
        let (tx, rx) = mpsc::channel();

        let started = Instant::now();
        let limiter = RateLimiter::new(bucket.clone(), rate, mode, interval)
            .spawn()
            .unwrap();

        let fetcher = RangeFetcher::new(
            0,
            "mem://file".into(),
            Range::new(0, total as u64 - 1).unwrap(),
            tx,
            bucket.clone(),
            source,
            Arc::new(NoopObserver),
            policy(),
            read_unit,
        );
        let worker = thread::spawn(move || fetcher.run());

        let mut arrivals = Vec::new();
        let mut queued = 0;
        let deadline = started + Duration::from_secs(10);
        while queued < total as u64 {
            let wait = deadline.saturating_duration_since(Instant::now());
            let chunk = rx
                .recv_timeout(wait)
                .unwrap_or_else(|_| panic!("fetcher stalled after {queued} bytes"));
            queued += chunk.length();
            arrivals.push((started.elapsed(), queued));
        }
        let elapsed = started.elapsed();

        worker.join().unwrap().unwrap();
        bucket.terminate();
        limiter.thread().unpark();
        limiter.join().unwrap();
        (arrivals, elapsed)
    }

    #[test]
    fn test_throughput_stays_within_the_budget() {
        let interval = Duration::from_millis(50);
        let (arrivals, elapsed) = fetch_throttled(1000, 200, RefillMode::Soft, interval, 100);

        // The k-th refill cannot happen before k intervals have passed.
        for (at, queued) in arrivals {
            let refills = at.as_millis() / interval.as_millis() + 1;
            assert!(
                u128::from(queued) <= refills * 200,
                "{queued} bytes queued after {at:?}"
            );
        }
        // 1000 bytes need five refills.
        assert!(elapsed >= interval * 4, "finished too early: {elapsed:?}");
    }

    #[test]
    fn test_hard_limit_smaller_than_read_unit_still_streams() {
        let config = crate::config::DownloadConfig {
            max_bytes_per_second: 1000,
            refill_mode: RefillMode::Hard,
            ..crate::config::DownloadConfig::default()
        };
        let interval = Duration::from_millis(20);

        let (arrivals, _) = fetch_throttled(
            5000,
            config.max_bytes_per_second,
            config.refill_mode,
            interval,
            config.effective_read_unit(),
        );

        assert_eq!(arrivals.last().map(|&(_, queued)| queued), Some(5000));
        assert!(arrivals.len() >= 5);
    }
}
