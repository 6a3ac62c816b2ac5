//! In-memory collaborators for tests.
//!
//! [`MockProbe`] serves canned probe output per file name and
//! [`MockTranscoder`] writes a small output file (or fails on request) while
//! recording every job it receives.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use async_trait::async_trait;
use crate::error::{ProbeError, TranscodeError};
use crate::ffprobe::{FFProbeData, FFProbeStream, Probe};
use crate::transcode::{TranscodeJob, TranscodeOutcome, Transcoder};

/// Build a single-video-stream probe result
pub fn video_probe(bits: Option<u32>, dims: Option<(i32, i32)>, creation_time: Option<&str>) -> FFProbeData {
    FFProbeData {
        streams: vec![FFProbeStream {
            codec_type: Some("video".to_string()),
            codec_name: Some("h264".to_string()),
            coded_width: dims.map(|d| d.0),
            coded_height: dims.map(|d| d.1),
            bits_per_raw_sample: bits.map(|b| b.to_string()),
            tags: creation_time.map(|t| HashMap::from([("creation_time".to_string(), t.to_string())])),
            ..Default::default()
        }],
        format: None,
    }
}

/// Probe returning canned results keyed by file name
#[derive(Debug, Default)]
pub struct MockProbe {
    results: Mutex<HashMap<String, FFProbeData>>,
    calls: Mutex<Vec<String>>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `data` for any path whose file name is `file_name`
    pub fn with(self, file_name: &str, data: FFProbeData) -> Self {
        self.results
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(file_name.to_string(), data);
        self
    }

    /// File names probed so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Probe for MockProbe {
    fn name(&self) -> &str {
        "mock-probe"
    }

    async fn probe(&self, path: &Path) -> Result<FFProbeData, ProbeError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(name.clone());
        self.results
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&name)
            .cloned()
            .ok_or_else(|| ProbeError::Failed {
                path: path.to_path_buf(),
                exit_code: 1,
                stderr: "no canned probe result".to_string(),
            })
    }
}

/// Transcoder that writes a marker file instead of encoding
#[derive(Debug, Default)]
pub struct MockTranscoder {
    failing: Mutex<HashSet<String>>,
    jobs: Mutex<Vec<TranscodeJob>>,
}

impl MockTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make jobs whose input file name is `file_name` fail
    pub fn failing_on(self, file_name: &str) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(file_name.to_string());
        self
    }

    /// Jobs received so far, in call order
    pub fn jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Input file names received so far
    pub fn inputs(&self) -> Vec<String> {
        self.jobs()
            .iter()
            .filter_map(|j| j.input.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    fn name(&self) -> &str {
        "mock-transcoder"
    }

    async fn transcode(&self, job: &TranscodeJob) -> Result<TranscodeOutcome, TranscodeError> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner()).push(job.clone());

        let input_name = job
            .input
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let fail = self.failing.lock().unwrap_or_else(|p| p.into_inner()).contains(&input_name);
        if fail {
            return Err(TranscodeError::Failed {
                input: job.input.clone(),
                exit_code: 1,
                stderr: "simulated encoder failure".to_string(),
            });
        }

        let contents = format!("{}:{}", job.codec, input_name);
        std::fs::write(&job.output, &contents)
            .map_err(|source| TranscodeError::Finalize { output: job.output.clone(), source })?;
        Ok(TranscodeOutcome {
            output: job.output.clone(),
            output_bytes: contents.len() as u64,
            duration_ms: 0,
        })
    }
}
