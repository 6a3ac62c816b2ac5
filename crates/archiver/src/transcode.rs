use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;
use crate::config::BatchConfig;
use crate::error::TranscodeError;

/// Marker inserted into in-progress output names
const PARTIAL_MARKER: &str = ".partial.";

/// One transcode request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Video codec identifier passed to the engine
    pub codec: String,
}

/// Result of a successful transcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutcome {
    pub output: PathBuf,
    pub output_bytes: u64,
    pub duration_ms: u64,
}

/// Opaque transcoding engine: produces `job.output` or fails
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this transcoder implementation.
    fn name(&self) -> &str;

    /// Transcode `job.input` into `job.output` with `job.codec`.
    async fn transcode(&self, job: &TranscodeJob) -> Result<TranscodeOutcome, TranscodeError>;
}

/// Hidden sibling path an output is written to before it is renamed into place.
///
/// `media/Proj_A_..._NA.mov` -> `media/.Proj_A_..._NA.partial.mov`
pub fn partial_output_path(output: &Path) -> PathBuf {
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let name = match output.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{}{}{}", stem, PARTIAL_MARKER, ext),
        None => format!(".{}{}out", stem, PARTIAL_MARKER),
    };
    output.with_file_name(name)
}

fn is_partial_output(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.contains(PARTIAL_MARKER)
}

/// Remove partial outputs left behind by an interrupted run.
/// Returns the number of files removed.
pub fn cleanup_partial_outputs(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot check {} for partial outputs: {}", dir.display(), e);
            return 0;
        }
    };

    let mut cleaned = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_partial = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(is_partial_output)
            .unwrap_or(false);
        if !is_partial || !path.is_file() {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted orphaned partial output: {}", path.display());
                cleaned += 1;
            }
            Err(e) => warn!("Failed to delete partial output {}: {}", path.display(), e),
        }
    }
    cleaned
}

/// Transcoder backed by a local ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_bin: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self { ffmpeg_bin: ffmpeg_bin.into() }
    }

    pub fn from_config(cfg: &BatchConfig) -> Self {
        Self::new(cfg.ffmpeg_bin.clone())
    }
}

/// ffmpeg arguments writing `job.input` to `target` with the job's codec
pub fn build_ffmpeg_args(job: &TranscodeJob, target: &Path) -> Vec<String> {
    let mut args = Vec::new();

    // Quiet, and overwrite only our own partial file
    args.push("-v".to_string());
    args.push("error".to_string());
    args.push("-y".to_string());

    args.push("-i".to_string());
    args.push(job.input.to_string_lossy().to_string());

    // Keep container and stream tags such as creation_time
    args.push("-map_metadata".to_string());
    args.push("0".to_string());

    args.push("-c:v".to_string());
    args.push(job.codec.clone());

    args.push(target.to_string_lossy().to_string());
    args
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(&self, job: &TranscodeJob) -> Result<TranscodeOutcome, TranscodeError> {
        if job.output.exists() {
            return Err(TranscodeError::OutputExists { output: job.output.clone() });
        }

        let partial = partial_output_path(&job.output);
        let args = build_ffmpeg_args(job, &partial);
        debug!("ffmpeg args: {:?}", args);

        let started = Instant::now();
        let output = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TranscodeError::Spawn { input: job.input.clone(), source })?;

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!("ffmpeg STDERR: {}", stderr);
            if partial.exists() {
                fs::remove_file(&partial).ok();
            }
            return Err(TranscodeError::Failed {
                input: job.input.clone(),
                exit_code,
                stderr,
            });
        }

        let output_bytes = match fs::metadata(&partial) {
            Ok(m) if m.len() > 0 => m.len(),
            _ => {
                fs::remove_file(&partial).ok();
                return Err(TranscodeError::MissingOutput { output: job.output.clone() });
            }
        };

        if job.output.exists() {
            fs::remove_file(&partial).ok();
            return Err(TranscodeError::OutputExists { output: job.output.clone() });
        }
        fs::rename(&partial, &job.output)
            .map_err(|source| TranscodeError::Finalize { output: job.output.clone(), source })?;

        Ok(TranscodeOutcome {
            output: job.output.clone(),
            output_bytes,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
