//! Runtime configuration.
//!
//! [`Settings`] are optional user defaults read from a JSON file;
//! [`DownloadConfig`] is the fully resolved configuration of one download.
use crate::args::Args;
use crate::error::DownloadError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Rate used when neither the command line nor the settings file sets one.
pub const DEFAULT_MAX_BYTES_PER_SECOND: u64 = 1_000_000;

/// Size of a single network read, and so the largest chunk a worker emits.
pub const READ_UNIT: usize = 4096;

/// How the rate limiter refills the token bucket every interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillMode {
    /// Add a second's worth of tokens; unused budget carries over.
    #[default]
    Soft,
    /// Reset the bucket to exactly a second's worth of tokens.
    Hard,
}

/// Retry behaviour shared by range workers and the file writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Everything a single download run needs to know.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Requested worker count. Ignored when resuming.
    pub workers: usize,
    pub max_bytes_per_second: u64,
    pub refill_mode: RefillMode,
    pub refill_interval: Duration,
    /// Directory the file and its metadata are written to.
    pub output_dir: PathBuf,
    pub retry: RetryPolicy,
    pub read_unit: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_bytes_per_second: DEFAULT_MAX_BYTES_PER_SECOND,
            refill_mode: RefillMode::Soft,
            refill_interval: Duration::from_secs(1),
            output_dir: PathBuf::from("."),
            retry: RetryPolicy::default(),
            read_unit: READ_UNIT,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl DownloadConfig {
    /// Command-line values win over the settings file, which wins over the
    /// built-in defaults.
    ///
    /// # Errors
    ///
    /// Fails when the resolved configuration does not pass [`validate`](Self::validate).
    pub fn from_args(args: &Args, settings: &Settings) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let hard_limit = args.hard_limit || settings.hard_limit.unwrap_or(false);

        let config = Self {
            workers: args.workers.or(settings.threads).unwrap_or(defaults.workers),
            max_bytes_per_second: args
                .max_bytes_per_second
                .or(settings.rate_limit)
                .unwrap_or(defaults.max_bytes_per_second),
            refill_mode: if hard_limit {
                RefillMode::Hard
            } else {
                RefillMode::Soft
            },
            output_dir: args
                .dir
                .clone()
                .or_else(|| settings.default_dir.clone())
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            retry: RetryPolicy {
                max_attempts: args.max_retries.or(settings.max_retries),
                ..defaults.retry
            },
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings under which no byte could ever be released.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.max_bytes_per_second == 0 {
            return Err(DownloadError::InvalidConfig(
                "max bytes per second must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Largest read a worker may ask the bucket for in one go.
    ///
    /// A hard refill never leaves more than `max_bytes_per_second` tokens in
    /// the bucket, so a larger read could never be paid for.
    pub fn effective_read_unit(&self) -> usize {
        let budget = usize::try_from(self.max_bytes_per_second).unwrap_or(usize::MAX);
        self.read_unit.clamp(1, budget.max(1))
    }
}

/// User defaults, loaded from `$RANGEDL_CONFIG` or `<config dir>/rangedl/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub threads: Option<usize>,
    pub rate_limit: Option<u64>,
    pub default_dir: Option<String>,
    pub max_retries: Option<u32>,
    pub hard_limit: Option<bool>,
}

impl Settings {
    /// Location of the settings file, if one can be determined.
    pub fn path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os("RANGEDL_CONFIG") {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("rangedl").join("config.json"))
    }

    /// Reads the settings file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
