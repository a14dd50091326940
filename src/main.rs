//! CLI entry point for the patchsync tool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use patchsync_core::config::DEFAULT_PROGRESS_MAX_AGE;
use patchsync_core::manifest::{generate_manifest, write_manifest};
use patchsync_core::{ProgressEvent, StatusReport, SyncConfig, SyncProgressCallback, Updater};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use app_config::FileConfig;
use cli::{Cli, Command, GenManifestArgs, SyncArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?cli, "CLI arguments parsed");

    match cli.command {
        Command::Sync(ref args) => run_sync(&cli, args).await,
        Command::GenManifest(ref args) => run_gen_manifest(args).await,
    }
}

/// Builds the sync configuration (file config underneath CLI flags), runs
/// one update, and prints the status report.
async fn run_sync(cli: &Cli, args: &SyncArgs) -> Result<()> {
    let file_config = app_config::load_file_config(cli.config.as_deref())?;
    let config = resolve_sync_config(args, &file_config)?;

    info!(
        manifest = %config.manifest_url,
        target = %config.target_dir.display(),
        concurrency = config.concurrency,
        "starting sync"
    );

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown requested, cancelling in-flight downloads");
            ctrl_c_cancel.cancel();
        }
    });

    let mut updater = Updater::new(config)?.with_cancellation(cancel);
    // Progress bars and JSON/quiet output do not mix.
    if !cli.quiet && !args.json {
        updater = updater.with_progress(progress_bars());
    }

    let report = updater.update().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    if !report.failed.is_empty() || !report.verification.corrupted.is_empty() {
        // Partial success still prints the full report; the exit code is
        // how scripts learn about it.
        std::process::exit(1);
    }
    Ok(())
}

/// Hashes a local tree into a manifest file.
async fn run_gen_manifest(args: &GenManifestArgs) -> Result<()> {
    let lines = generate_manifest(&args.target, &args.exclusions)
        .await
        .with_context(|| format!("failed to generate manifest for '{}'", args.target.display()))?;
    write_manifest(&lines, &args.output)
        .await
        .with_context(|| format!("failed to write manifest to '{}'", args.output.display()))?;
    println!("{} entries written to {}", lines.len(), args.output.display());
    Ok(())
}

/// Merges CLI flags over file config into the explicit sync configuration.
fn resolve_sync_config(args: &SyncArgs, file_config: &FileConfig) -> Result<SyncConfig> {
    let Some(server_url) = args
        .server_url
        .clone()
        .or_else(|| file_config.server_url.clone())
    else {
        bail!("`--server-url` is required (flag or config file)");
    };
    let Some(manifest_url) = args
        .manifest_url
        .clone()
        .or_else(|| file_config.manifest_url.clone())
    else {
        bail!("`--manifest-url` is required (flag or config file)");
    };
    let target_dir = args
        .target
        .clone()
        .or_else(|| file_config.target_dir.clone())
        .unwrap_or_else(|| PathBuf::from("patch"));

    let mut config = SyncConfig::new(server_url, manifest_url, target_dir);
    if let Some(concurrency) = args.concurrency.or(file_config.concurrency) {
        config.concurrency = usize::from(concurrency);
    }
    if let Some(retries) = args.retries.or(file_config.retries) {
        config.retry_count = u32::from(retries);
    }
    if let Some(segments) = args.segments.or(file_config.segments) {
        config.segment_count_hint = usize::from(segments);
    }
    if let Some(speed_limit) = args.speed_limit.or(file_config.speed_limit) {
        config.speed_limit_bytes_per_sec = speed_limit;
    }
    if let Some(timeout_secs) = args.timeout.or(file_config.timeout_secs) {
        config.request_timeout = Duration::from_secs(timeout_secs);
    }
    config.progress_max_age = file_config
        .progress_max_age_secs
        .map_or(DEFAULT_PROGRESS_MAX_AGE, Duration::from_secs);

    Ok(config)
}

/// One progress bar per in-flight file, keyed by relative path.
fn progress_bars() -> SyncProgressCallback {
    let multi = MultiProgress::new();
    let bars: Mutex<HashMap<String, ProgressBar>> = Mutex::new(HashMap::new());
    let style = ProgressStyle::with_template(
        "{msg:30!} {bar:30.cyan/blue} {bytes:>9}/{total_bytes:9}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());

    Arc::new(move |relative_path: &str, event: ProgressEvent| {
        let mut bars = bars.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match event {
            ProgressEvent::Progress { current, total } => {
                let bar = bars.entry(relative_path.to_string()).or_insert_with(|| {
                    let bar = multi.add(ProgressBar::new(total));
                    bar.set_style(style.clone());
                    bar.set_message(relative_path.to_string());
                    bar
                });
                bar.set_length(total);
                bar.set_position(current);
            }
            ProgressEvent::Completed => {
                if let Some(bar) = bars.remove(relative_path) {
                    bar.finish_and_clear();
                }
            }
            ProgressEvent::Failed { reason } => {
                if let Some(bar) = bars.remove(relative_path) {
                    bar.abandon_with_message(format!("{relative_path}: {reason}"));
                }
            }
        }
    })
}

/// Human-readable report summary.
fn print_summary(report: &StatusReport) {
    println!(
        "updated: {}  skipped: {}  failed: {}",
        report.updated.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for path in &report.updated {
        println!("  updated   {path}");
    }
    for path in &report.failed {
        println!("  failed    {path}");
    }
    for path in &report.verification.corrupted {
        println!("  corrupted {path}");
    }
    if !report.updated.is_empty() {
        println!(
            "verification: {} verified, {} corrupted",
            report.verification.verified.len(),
            report.verification.corrupted.len()
        );
    }
}
