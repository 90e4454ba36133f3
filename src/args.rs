use clap::Parser;

/// A resumable, multi-connection HTTP downloader.
///
/// Splits the file into one byte range per connection, throttles the combined
/// transfer rate, and picks up where it left off if interrupted.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The URL of the file to download.
    pub url: String,

    /// Number of concurrent connections. Ignored when resuming.
    pub workers: Option<usize>,

    /// Combined download limit in bytes per second (e.g. 1048576 for 1MB/s).
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub max_bytes_per_second: Option<u64>,

    /// The directory to save the file in. Defaults to the current directory.
    #[arg(short = 'd', long)]
    pub dir: Option<String>,

    /// Reset the budget every second instead of accumulating unused bytes.
    #[arg(long)]
    pub hard_limit: bool,

    /// Give up after this many consecutive failures of one range or disk write.
    #[arg(long)]
    pub max_retries: Option<u32>,
}
