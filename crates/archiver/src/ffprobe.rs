use std::collections::HashMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use tokio::process::Command;
use crate::config::BatchConfig;
use crate::error::ProbeError;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: Option<FFProbeFormat>,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeStream {
    #[serde(default)]
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub coded_width: Option<i32>,
    pub coded_height: Option<i32>,
    pub pix_fmt: Option<String>,
    pub bits_per_raw_sample: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

impl FFProbeData {
    /// Stream the naming fields are read from: the first video stream, else the first stream
    pub fn primary_stream(&self) -> Option<&FFProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .or_else(|| self.streams.first())
    }

    /// Look up a format-level tag
    pub fn format_tag(&self, key: &str) -> Option<&str> {
        self.format
            .as_ref()
            .and_then(|f| f.tags.as_ref())
            .and_then(|tags| lookup_tag(tags, key))
    }
}

impl FFProbeStream {
    /// Look up a stream tag; ffprobe reports tag keys in whatever case the muxer wrote
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.as_ref().and_then(|tags| lookup_tag(tags, key))
    }
}

fn lookup_tag<'a>(tags: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    tags.get(key)
        .or_else(|| {
            tags.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
        .map(|v| v.as_str())
}

/// Black-box metadata probe: one call per file
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns the name of this probe implementation.
    fn name(&self) -> &str;

    /// Probe a media file and return its stream/format metadata.
    async fn probe(&self, path: &Path) -> Result<FFProbeData, ProbeError>;
}

/// Probe backed by a local ffprobe binary
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe_bin: PathBuf,
}

impl FfprobeProbe {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self { ffprobe_bin: ffprobe_bin.into() }
    }

    pub fn from_config(cfg: &BatchConfig) -> Self {
        Self::new(cfg.ffprobe_bin.clone())
    }
}

#[async_trait]
impl Probe for FfprobeProbe {
    fn name(&self) -> &str {
        "ffprobe"
    }

    async fn probe(&self, path: &Path) -> Result<FFProbeData, ProbeError> {
        // Verify file exists before trying to probe
        if !path.exists() {
            return Err(ProbeError::NotFound { path: path.to_path_buf() });
        }

        debug!("ffprobe: probing {}", path.display());

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProbeError::Spawn { path: path.to_path_buf(), source })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: path.to_path_buf(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(path, &output.stdout)
    }
}

/// Parse raw `ffprobe -print_format json` output
pub fn parse_probe_output(path: &Path, stdout: &[u8]) -> Result<FFProbeData, ProbeError> {
    serde_json::from_slice(stdout).map_err(|source| ProbeError::Parse { path: path.to_path_buf(), source })
}
