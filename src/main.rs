//! CLI entry point for the adaptive batch downloader.

use anyhow::{Context, Result};
use clap::Parser;
use adaptive_dl_core::{BatchConfig, BatchOrchestrator, HeadlessLinkProvider, ReqwestTransport};
use tracing::info;

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(base_url = %args.base_url, count = args.count, mode = ?args.mode, "adaptive-dl starting");

    let config = BatchConfig::new(
        args.base_url.clone(),
        i64::from(args.count),
        args.mode,
        args.out_dir.clone(),
    )
    .context("invalid batch configuration")?
    .with_probe_every_n(args.probe_every_n)
    .context("invalid probe cadence")?;

    let orchestrator = BatchOrchestrator::new(ReqwestTransport::new(), HeadlessLinkProvider);
    let report = orchestrator.run_batch(config).await;

    info!(
        total_time = report.total_time,
        wall_time = report.wall_time,
        paused_ms = report.paused_ms,
        total_bytes = report.total_bytes,
        weak_detect_index = report.weak_detect_index,
        "batch complete"
    );

    let json = serde_json::to_string_pretty(&report).context("failed to serialize batch report")?;
    match &args.report_out {
        Some(path) => {
            tokio::fs::write(path, &json)
                .await
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "wrote batch report");
        }
        None => println!("{json}"),
    }

    Ok(())
}
