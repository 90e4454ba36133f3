//! The remote side of a download: size probing and byte-range streaming.
use crate::error::{DownloadError, Result};
use crate::state::Range;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use std::io::Read;
use std::time::Duration;
use tracing::debug;

/// Byte stream returned by [`RangeSource::fetch_range`].
pub type RangeStream = Box<dyn Read + Send>;

/// A remote resource that can report its size and serve byte ranges.
pub trait RangeSource: Send + Sync {
    /// Total size of the resource in bytes.
    fn probe_size(&self, url: &str) -> Result<u64>;

    /// Opens a stream positioned at `range.start` that yields at most
    /// `range.len()` bytes.
    fn fetch_range(&self, url: &str, range: Range) -> Result<RangeStream>;
}

/// [`RangeSource`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    /// `io_timeout` bounds every individual read, so a stalled connection
    /// surfaces as an error the worker can retry.
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("rangedl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .timeout(io_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl RangeSource for HttpSource {
    /// Fetches the Content-Length of a file from a URL using a HEAD request.
    fn probe_size(&self, url: &str) -> Result<u64> {
        let response = self.client.head(url).send()?;

        if !response.status().is_success() {
            return Err(DownloadError::Probe(format!(
                "request failed with status {}",
                response.status()
            )));
        }

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .ok_or_else(|| DownloadError::Probe("no Content-Length in response".to_string()))?
            .to_str()
            .map_err(|e| DownloadError::Probe(e.to_string()))?
            .parse::<u64>()
            .map_err(|e| DownloadError::Probe(e.to_string()))?;

        debug!(url, size, "Probed remote size");
        Ok(size)
    }

    fn fetch_range(&self, url: &str, range: Range) -> Result<RangeStream> {
        let response = self
            .client
            .get(url)
            .header(RANGE, range.header_value())
            .send()?
            .error_for_status()?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            // The whole body is acceptable when it starts where we want it to.
            StatusCode::OK if range.start == 0 => {}
            status => {
                return Err(DownloadError::RangeNotSupported {
                    start: range.start,
                    end: range.end,
                    status: status.as_u16(),
                });
            }
        }

        Ok(Box::new(response.take(range.len())))
    }
}
