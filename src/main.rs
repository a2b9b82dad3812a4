// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! segserve — segment a video into HLS chunks and serve them.
//!
//! Usage:
//!   segserve run     --config config.toml          # segment, write playlist, serve
//!   segserve segment --config config.toml          # segment + playlist only
//!   segserve run --source clip.mp4 --listen 127.0.0.1:8000

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use segserve::config::Config;
use segserve::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "segserve", about = "Segment a video and serve it as HLS", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Segment the source, write the playlist and serve it until CTRL+C.
    Run {
        #[command(flatten)]
        common: CommonArgs,
        /// Override `http.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Segment the source and write the playlist, then exit.
    Segment {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override `source.path`.
    #[arg(long)]
    source: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run { common, listen } => run_serve(common, listen).await,
        Command::Segment { common } => run_segment(common).await,
    };

    if let Err(e) = outcome {
        error!(error = ?e, "segserve failed");
        std::process::exit(1);
    }
}

fn load_config(common: &CommonArgs, listen: Option<SocketAddr>) -> anyhow::Result<Config> {
    let mut cfg = match &common.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(source) = &common.source {
        cfg.source.path = source.clone();
    }
    if let Some(addr) = listen {
        cfg.http.listen = addr;
    }
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

async fn run_serve(common: CommonArgs, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let cfg = load_config(&common, listen)?;
    log_config(&cfg, common.config.as_deref());

    let orchestrator = Orchestrator::new(cfg);
    orchestrator
        .run(shutdown_signal())
        .await
        .context("pipeline aborted")?;
    Ok(())
}

async fn run_segment(common: CommonArgs) -> anyhow::Result<()> {
    let cfg = load_config(&common, None)?;
    log_config(&cfg, common.config.as_deref());

    let playlist_path = cfg.playlist.path.clone();
    let orchestrator = Orchestrator::new(cfg);
    let manifest = orchestrator.prepare().await.context("segmentation aborted")?;

    println!("Chunks   : {}", manifest.len());
    println!("Duration : {:.3}s", manifest.total_duration());
    println!("Playlist : {}", playlist_path.display());
    Ok(())
}

fn log_config(cfg: &Config, file: Option<&Path>) {
    info!(
        config = ?file,
        source = ?cfg.source.path,
        segments = ?cfg.segments.dir,
        chunk_secs = cfg.segments.chunk_duration_secs,
        timeout_secs = cfg.segments.timeout_secs,
        playlist = ?cfg.playlist.path,
        listen = %cfg.http.listen,
        "Starting segserve"
    );
}

/// Resolves on CTRL+C.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL+C, shutting down…"),
        Err(e) => error!(error = %e, "Signal error"),
    }
}
