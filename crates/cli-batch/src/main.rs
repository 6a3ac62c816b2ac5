use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use anyhow::{Context, Result};
use archiver::{BatchConfig, BatchOrchestrator, BatchReport, DetectionMode, FileState};
use clap::Parser;
use log::{error, info, warn, LevelFilter};

/// Transcode a project's media directory into canonically named outputs and
/// archive the originals
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Project root containing the source directory
    #[arg(short, long)]
    project_dir: Option<PathBuf>,

    /// Project identifier used as the first name segment
    #[arg(long)]
    project_id: Option<String>,

    /// Target video codec passed to ffmpeg
    #[arg(long)]
    codec: Option<String>,

    /// Source directory, relative to the project directory
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Archive directory, relative to the source directory
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// How earlier runs are detected
    #[arg(long)]
    detection: Option<DetectionMode>,

    /// Probe and plan names without transcoding or moving anything
    #[arg(long)]
    dry_run: bool,

    /// Write the batch report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, cfg: &mut BatchConfig) {
        if let Some(dir) = &self.project_dir {
            cfg.project_dir = dir.clone();
        }
        if let Some(id) = &self.project_id {
            cfg.project_id = Some(id.clone());
        }
        if let Some(codec) = &self.codec {
            cfg.codec = codec.clone();
        }
        if let Some(dir) = &self.source_dir {
            cfg.source_dir = dir.clone();
        }
        if let Some(dir) = &self.archive_dir {
            cfg.archive_dir = dir.clone();
        }
        if let Some(mode) = self.detection {
            cfg.detection = mode;
        }
        if self.dry_run {
            cfg.dry_run = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let mut logger = env_logger::Builder::new();
    logger.filter_level(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    logger.parse_env("RUST_LOG");
    logger.format_timestamp_secs().init();

    let mut cfg = BatchConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.apply(&mut cfg);
    cfg.validate().context("Invalid configuration")?;

    info!("autotranscode starting");
    info!("Configuration loaded:");
    info!("  Project dir: {}", cfg.project_dir.display());
    info!("  Project id: {}", cfg.resolved_project_id());
    info!("  Source dir: {}", cfg.source_path().display());
    info!("  Archive dir: {}", cfg.archive_path().display());
    info!("  Codec: {} (.{})", cfg.codec, cfg.output_extension);
    info!("  Detection: {}", cfg.detection);
    info!("  State dir: {}", cfg.state_path().display());

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current file");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let report = BatchOrchestrator::from_config(cfg)
        .with_cancel_flag(cancel)
        .run()
        .await
        .context("Batch aborted")?;

    if let Some(path) = &args.report {
        write_report(&report, path)?;
        info!("Report written to {}", path.display());
    }

    print_summary(&report);

    if report.has_failures() || report.cancelled {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn write_report(report: &BatchReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize batch report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(())
}

fn print_summary(report: &BatchReport) {
    for file in report.failures() {
        error!(
            "{} [{}]: {}",
            file.source.display(),
            file.state,
            file.reason.as_deref().unwrap_or("unknown error")
        );
    }
    if report.dry_run {
        for file in report.files.iter().filter(|f| f.state == FileState::Planned) {
            if let Some(output) = &file.output {
                info!("would create {} from {}", output.display(), file.source.display());
            }
        }
    }
    info!(
        "{} file(s): {} archived, {} skipped, {} failed{}",
        report.files.len(),
        report.count(FileState::Archived),
        report.count(FileState::Skipped),
        report.failures().count(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
}
