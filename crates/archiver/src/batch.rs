//! One pass over a project's source directory.
//!
//! Per file: detect earlier processing, extract metadata, compose the
//! canonical name, transcode, archive. Per-file failures are recorded and the
//! pass moves on; only failing to enumerate the source directory aborts it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use uuid::Uuid;
use crate::archive::ArchiveMover;
use crate::config::BatchConfig;
use crate::detector::{Detection, ProcessedSetDetector};
use crate::error::BatchError;
use crate::ffprobe::{FfprobeProbe, Probe};
use crate::manifest::{FileState, Manifest, ManifestRecord};
use crate::metadata::{MetadataExtractor, MetadataField};
use crate::naming;
use crate::scan::{self, MediaFile, ScanResult};
use crate::transcode::{self, FfmpegTranscoder, TranscodeJob, Transcoder};

/// Final state of one file in a batch
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub source: PathBuf,
    pub state: FileState,
    /// Canonical output (produced, found, or planned in a dry run)
    pub output: Option<PathBuf>,
    pub archived_to: Option<PathBuf>,
    /// Whether the transcode step ran for this file in this batch
    pub transcoded: bool,
    /// Fields that fell back to the sentinel
    pub missing_fields: Vec<MetadataField>,
    pub reason: Option<String>,
}

impl FileReport {
    fn new(file: &MediaFile, state: FileState) -> Self {
        Self {
            source: file.path.clone(),
            state,
            output: None,
            archived_to: None,
            transcoded: false,
            missing_fields: Vec::new(),
            reason: None,
        }
    }

    fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Outcome of a whole batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub project_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The batch stopped early on request
    pub cancelled: bool,
    /// Entries left out at enumeration (path, reason)
    pub ignored: Vec<(PathBuf, String)>,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn count(&self, state: FileState) -> usize {
        self.files.iter().filter(|f| f.state == state).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.state.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn file(&self, file_name: &str) -> Option<&FileReport> {
        self.files
            .iter()
            .find(|f| f.source.file_name().and_then(|n| n.to_str()) == Some(file_name))
    }
}

/// Drives one batch over the configured source directory
pub struct BatchOrchestrator {
    cfg: BatchConfig,
    project_id: String,
    extractor: MetadataExtractor,
    transcoder: Arc<dyn Transcoder>,
    mover: ArchiveMover,
    detector: ProcessedSetDetector,
    cancel: Arc<AtomicBool>,
}

impl BatchOrchestrator {
    pub fn new(cfg: BatchConfig, probe: Arc<dyn Probe>, transcoder: Arc<dyn Transcoder>) -> Self {
        let project_id = cfg.resolved_project_id();
        let detector = ProcessedSetDetector::new(cfg.detection, project_id.clone(), cfg.output_extension.clone());
        let mover = ArchiveMover::new(cfg.archive_path());
        Self {
            cfg,
            project_id,
            extractor: MetadataExtractor::new(probe),
            transcoder,
            mover,
            detector,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Orchestrator using the ffprobe/ffmpeg binaries named in `cfg`
    pub fn from_config(cfg: BatchConfig) -> Self {
        let probe = Arc::new(FfprobeProbe::from_config(&cfg));
        let transcoder = Arc::new(FfmpegTranscoder::from_config(&cfg));
        Self::new(cfg, probe, transcoder)
    }

    /// Share a cancellation flag; once set, the batch stops before the next file
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Run one batch over a fixed snapshot of the source directory
    pub async fn run(&self) -> Result<BatchReport, BatchError> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let source_dir = self.cfg.source_path();
        let dry_run = self.cfg.dry_run;

        info!(
            "Batch {} starting: project '{}', source {}, codec {}, detection {}{}",
            run_id,
            self.project_id,
            source_dir.display(),
            self.cfg.codec,
            self.detector.mode(),
            if dry_run { " (dry run)" } else { "" }
        );

        if !dry_run {
            let cleaned = transcode::cleanup_partial_outputs(&source_dir);
            if cleaned > 0 {
                info!("Removed {} partial output(s) from an interrupted run", cleaned);
            }
        }
        if !self.mover.archive_dir().is_dir() {
            warn!(
                "Archive directory {} does not exist; archiving will fail",
                self.mover.archive_dir().display()
            );
        }

        let snapshot = scan::scan_source_dir(&self.cfg, &self.project_id)?;
        let state_dir = self.cfg.state_path();
        let mut manifest = match Manifest::load(&state_dir) {
            Ok(manifest) if dry_run => manifest.into_read_only(),
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Manifest unavailable, detecting from the listing only: {}", e);
                Manifest::empty(&state_dir).into_read_only()
            }
        };
        debug!("Loaded {} manifest record(s) from {}", manifest.len(), manifest.dir().display());

        let ignored = snapshot
            .results
            .iter()
            .filter_map(|r| match r {
                ScanResult::Skipped(path, reason) => Some((path.clone(), reason.clone())),
                ScanResult::Candidate(_) => None,
            })
            .collect();

        let mut files = Vec::new();
        let mut cancelled = false;
        for file in snapshot.candidates() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Batch {} cancelled; {} file(s) left untouched", run_id, snapshot.candidates().count() - files.len());
                cancelled = true;
                break;
            }
            let report = self.process_file(file, &snapshot.listing, &mut manifest, &run_id).await;
            files.push(report);
        }

        let report = BatchReport {
            run_id,
            project_id: self.project_id.clone(),
            dry_run,
            started_at,
            finished_at: Utc::now(),
            cancelled,
            ignored,
            files,
        };

        info!(
            "Batch {} finished: {} archived, {} skipped, {} transcode failure(s), {} archive failure(s), {} planned",
            report.run_id,
            report.count(FileState::Archived),
            report.count(FileState::Skipped),
            report.count(FileState::TranscodeFailed),
            report.count(FileState::ArchiveFailed),
            report.count(FileState::Planned),
        );
        Ok(report)
    }

    async fn process_file(
        &self,
        file: &MediaFile,
        listing: &[String],
        manifest: &mut Manifest,
        run_id: &str,
    ) -> FileReport {
        match self.detector.detect(file, listing, manifest) {
            Detection::AlreadyArchived => {
                info!("{}: already archived by an earlier run, skipping", file.file_name);
                FileReport::new(file, FileState::Skipped).with_reason("already archived")
            }
            Detection::TokenMatch { token, matched } => {
                info!("{}: token '{}' found in '{}', skipping", file.file_name, token, matched);
                FileReport::new(file, FileState::Skipped)
                    .with_reason(format!("token '{}' matches '{}'", token, matched))
            }
            Detection::OutputPresent { output_name } => {
                let output = file.parent().join(&output_name);
                info!("{}: output {} already present, resuming at archive step", file.file_name, output_name);
                if self.cfg.dry_run {
                    let mut report = FileReport::new(file, FileState::Planned)
                        .with_reason("dry run: output present, would archive");
                    report.output = Some(output);
                    return report;
                }
                self.record(manifest, file, run_id, |r| {
                    r.output_name = Some(output_name.clone());
                    r.original_bytes = Some(file.size_bytes);
                    r.transition(FileState::Transcoded, Some("output found from earlier run".to_string()));
                });
                let mut report = self.archive_step(file, manifest, run_id).await;
                report.output = Some(output);
                report
            }
            Detection::Fresh => self.convert_and_archive(file, manifest, run_id).await,
        }
    }

    async fn convert_and_archive(&self, file: &MediaFile, manifest: &mut Manifest, run_id: &str) -> FileReport {
        let metadata_report = self.extractor.extract(&file.path).await;
        let metadata = metadata_report.normalized();
        let name = naming::compose(&self.project_id, &file.stem, &metadata, &self.cfg.output_extension);
        let output = file.parent().join(name.as_str());
        let missing_fields: Vec<_> = metadata_report.missing().map(|(field, _)| field).collect();

        info!("{}: canonical name {}", file.file_name, name);

        if self.cfg.dry_run {
            let mut report = FileReport::new(file, FileState::Planned).with_reason("dry run: would transcode and archive");
            report.output = Some(output);
            report.missing_fields = missing_fields;
            return report;
        }

        if output.exists() {
            let reason = format!("output {} already exists", name);
            warn!("{}: {}, not overwriting", file.file_name, reason);
            self.record(manifest, file, run_id, |r| r.transition(FileState::TranscodeFailed, Some(reason.clone())));
            let mut report = FileReport::new(file, FileState::TranscodeFailed).with_reason(reason);
            report.missing_fields = missing_fields;
            return report;
        }

        self.record(manifest, file, run_id, |r| {
            r.output_name = Some(name.to_string());
            r.original_bytes = Some(file.size_bytes);
            r.output_bytes = None;
            r.transition(FileState::Transcoding, None);
        });

        let job = TranscodeJob {
            input: file.path.clone(),
            output: output.clone(),
            codec: self.cfg.codec.clone(),
        };
        info!("{}: transcoding with {} ({})", file.file_name, self.transcoder.name(), job.codec);

        match self.transcoder.transcode(&job).await {
            Ok(outcome) => {
                info!(
                    "{}: transcoded to {} ({} bytes in {} ms)",
                    file.file_name,
                    outcome.output.display(),
                    outcome.output_bytes,
                    outcome.duration_ms
                );
                self.record(manifest, file, run_id, |r| {
                    r.output_bytes = Some(outcome.output_bytes);
                    r.transition(FileState::Transcoded, None);
                });
            }
            Err(e) => {
                error!("{}: transcode failed: {}", file.file_name, e);
                let reason = e.to_string();
                self.record(manifest, file, run_id, |r| r.transition(FileState::TranscodeFailed, Some(reason.clone())));
                let mut report = FileReport::new(file, FileState::TranscodeFailed).with_reason(reason);
                report.missing_fields = missing_fields;
                return report;
            }
        }

        let mut report = self.archive_step(file, manifest, run_id).await;
        report.output = Some(output);
        report.transcoded = true;
        report.missing_fields = missing_fields;
        report
    }

    async fn archive_step(&self, file: &MediaFile, manifest: &mut Manifest, run_id: &str) -> FileReport {
        self.record(manifest, file, run_id, |r| r.transition(FileState::Archiving, None));

        match self.mover.archive(&file.path).await {
            Ok(record) => {
                self.record(manifest, file, run_id, |r| r.transition(FileState::Archived, None));
                let mut report = FileReport::new(file, FileState::Archived);
                report.archived_to = Some(record.destination);
                report
            }
            Err(e) => {
                if e.is_collision() {
                    warn!("{}: not archived, original left in place: {}", file.file_name, e);
                } else {
                    error!("{}: archive failed: {}", file.file_name, e);
                }
                let reason = e.to_string();
                self.record(manifest, file, run_id, |r| r.transition(FileState::ArchiveFailed, Some(reason.clone())));
                FileReport::new(file, FileState::ArchiveFailed).with_reason(reason)
            }
        }
    }

    // Manifest write failures never change a file's outcome
    fn record<F>(&self, manifest: &mut Manifest, file: &MediaFile, run_id: &str, update: F)
    where
        F: FnOnce(&mut ManifestRecord),
    {
        if let Err(e) = manifest.update(&file.file_name, run_id, update) {
            warn!("{}: failed to update manifest: {}", file.file_name, e);
        }
    }
}

/// Run one batch with the external ffprobe/ffmpeg collaborators
pub async fn run_batch(cfg: BatchConfig) -> Result<BatchReport, BatchError> {
    BatchOrchestrator::from_config(cfg).run().await
}
