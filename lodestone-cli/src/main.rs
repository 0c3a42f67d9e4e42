//! Lodestone CLI - resolve a magnet link into a `.torrent` file
//!
//! Exit codes: 0 when the file was written, 1 when resolution failed or
//! timed out, 2 on a usage error (reported by clap before anything runs).

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use lodestone_core::ProxyEndpoint;
use lodestone_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "lodestone")]
#[command(about = "Fetch torrent metadata for a magnet link and save it as a .torrent file")]
#[command(version)]
pub struct Cli {
    /// Magnet URI to resolve
    pub magnet_uri: String,

    /// Destination of the .torrent file
    #[arg(default_value = "out.torrent")]
    pub output: PathBuf,

    /// Route all traffic through the SOCKS5 proxy and disable local discovery
    #[arg(short, long)]
    pub anonymous: bool,

    /// Use TCP for peers; with --udp as well, prefer UDP trackers
    #[arg(short, long)]
    pub tcp: bool,

    /// Use UDP for peers; with --tcp as well, prefer UDP trackers
    #[arg(short, long)]
    pub udp: bool,

    /// SOCKS5 proxy for anonymous mode
    #[arg(long, value_name = "HOST:PORT", requires = "anonymous")]
    pub proxy: Option<ProxyEndpoint>,

    /// Give up when no metadata arrived after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Milliseconds between session polls
    #[arg(long, value_name = "MS")]
    pub poll_interval: Option<u64>,

    /// Maximum simultaneous peer connections
    #[arg(long, value_name = "N")]
    pub max_peers: Option<usize>,

    /// Stamp the current time into the file (output is no longer reproducible)
    #[arg(long)]
    pub creation_date: bool,

    /// Console log level; RUST_LOG takes precedence
    #[arg(long, value_enum, default_value_t = CliLogLevel::Warn)]
    pub log_level: CliLogLevel,

    /// Also write a full trace log into this directory
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli) {
        eprintln!("error: setup: {e:#}");
        return ExitCode::FAILURE;
    }

    match commands::resolve_magnet(&cli).await {
        Ok(report) => {
            println!("Created .torrent file: {}", report.output_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}: {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let log_file = init_tracing(cli.log_level.as_tracing_level(), cli.log_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("failed to initialize logging")?;
    if let Some(path) = log_file {
        tracing::info!("Writing trace log to {}", path.display());
    }
    Ok(())
}
