use anyhow::Result;
use clap::Parser;
use rangedl::{Args, ConsoleObserver, DownloadConfig, Downloader, HttpSource, Settings};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rangedl=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn run(args: &Args) -> Result<()> {
    let settings = Settings::load().unwrap_or_else(|e| {
        warn!("Ignoring unreadable settings file: {e:#}");
        Settings::default()
    });
    let config = DownloadConfig::from_args(args, &settings)?;

    eprintln!(
        "Downloading using {} connections limited to {} Bps...",
        config.workers, config.max_bytes_per_second
    );

    let source = HttpSource::new(config.connect_timeout, config.read_timeout)?;
    let downloader = Downloader::new(config, Arc::new(source), Arc::new(ConsoleObserver::new()));
    let report = downloader.run(&args.url)?;

    info!(
        "Saved {} ({} bytes, {} resumed, {} connections)",
        report.output.display(),
        report.total_bytes,
        report.resumed_bytes,
        report.workers
    );
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => {
            eprintln!("Download succeeded");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            eprintln!("Download failed");
            ExitCode::FAILURE
        }
    }
}
