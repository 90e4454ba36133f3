//! In-memory sources and observers for unit tests.
use crate::error::{DownloadError, Result};
use crate::observer::ProgressObserver;
use crate::state::Range;
use crate::transport::{RangeSource, RangeStream};
use std::io::{self, Cursor, Read};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Serves ranges of a fixed byte buffer and records every request.
pub struct MemorySource {
    data: Vec<u8>,
    requests: Mutex<Vec<Range>>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `len` bytes of a repeating, non-zero pattern.
    pub fn patterned(len: usize) -> Self {
        Self::new((0..len).map(|i| (i % 251) as u8 + 1).collect())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn requests(&self) -> Vec<Range> {
        self.requests.lock().unwrap().clone()
    }

    fn slice(&self, range: Range) -> Vec<u8> {
        let end = (range.end as usize + 1).min(self.data.len());
        self.data[range.start as usize..end].to_vec()
    }
}

impl RangeSource for MemorySource {
    fn probe_size(&self, _url: &str) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn fetch_range(&self, _url: &str, range: Range) -> Result<RangeStream> {
        self.requests.lock().unwrap().push(range);
        Ok(Box::new(Cursor::new(self.slice(range))))
    }
}

/// Wraps a [`MemorySource`]; the first fetch breaks after `fail_after` bytes.
pub struct FlakySource {
    inner: MemorySource,
    fail_after: Option<usize>,
    tripped: AtomicBool,
}

impl FlakySource {
    pub fn new(inner: MemorySource, fail_after: usize) -> Self {
        Self {
            inner,
            fail_after: Some(fail_after),
            tripped: AtomicBool::new(false),
        }
    }

    /// Every fetch fails before sending anything.
    pub fn always_failing(inner: MemorySource) -> Self {
        Self {
            inner,
            fail_after: None,
            tripped: AtomicBool::new(false),
        }
    }

    pub fn requests(&self) -> Vec<Range> {
        self.inner.requests()
    }
}

impl RangeSource for FlakySource {
    fn probe_size(&self, url: &str) -> Result<u64> {
        self.inner.probe_size(url)
    }

    fn fetch_range(&self, url: &str, range: Range) -> Result<RangeStream> {
        let Some(fail_after) = self.fail_after else {
            self.inner.requests.lock().unwrap().push(range);
            return Err(DownloadError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        };

        let stream = self.inner.fetch_range(url, range)?;
        if self.tripped.swap(true, Ordering::SeqCst) {
            return Ok(stream);
        }
        Ok(Box::new(BrokenAfter {
            inner: stream.take(fail_after as u64),
        }))
    }
}

/// Yields the inner bytes, then fails instead of reporting end of stream.
struct BrokenAfter<R> {
    inner: R,
}

impl<R: Read> Read for BrokenAfter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
            n => Ok(n),
        }
    }
}

/// Keeps every [`ProgressObserver::message`] it receives.
#[derive(Default)]
pub struct MessageLog {
    messages: Mutex<Vec<String>>,
}

impl MessageLog {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ProgressObserver for MessageLog {
    fn start(&self, _total: u64, _downloaded: u64) {}
    fn inc(&self, _delta: u64) {}
    fn percent(&self, _percent: u8) {}
    fn message(&self, msg: String) {
        self.messages.lock().unwrap().push(msg);
    }
    fn finish(&self) {}
}
