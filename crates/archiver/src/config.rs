use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Media file extensions picked up from the source directory
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "mkv", "avi", "mts", "mxf"];

/// How the orchestrator decides that a file was already handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Consult the persisted manifest, then look for this file's canonical output
    #[default]
    Manifest,
    /// Legacy stem-token substring match against the directory listing
    Token,
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMode::Manifest => write!(f, "manifest"),
            DetectionMode::Token => write!(f, "token"),
        }
    }
}

impl FromStr for DetectionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "manifest" => Ok(DetectionMode::Manifest),
            "token" => Ok(DetectionMode::Token),
            other => bail!("unknown detection mode '{}' (expected 'manifest' or 'token')", other),
        }
    }
}

/// Configuration for one batch run over a project directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Project root; sources live under `<project_dir>/<source_dir>`
    pub project_dir: PathBuf,
    /// Project identity used as the first segment of canonical names.
    /// Defaults to the final component of `project_dir`.
    pub project_id: Option<String>,
    /// Codec handed to the transcoder (ffmpeg `-c:v` value)
    pub codec: String,
    /// Extension of transcoded outputs, without the dot
    pub output_extension: String,
    /// Source subdirectory, relative to `project_dir`
    pub source_dir: PathBuf,
    /// Archive subdirectory, relative to the source directory
    pub archive_dir: PathBuf,
    /// Source file extensions to consider (case-insensitive)
    pub extensions: Vec<String>,
    /// Already-processed detection strategy
    pub detection: DetectionMode,
    /// Probe and compose names only; never transcode, archive or write state
    pub dry_run: bool,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Directory holding manifest records. Defaults to `<project_dir>/.autotranscode`.
    pub state_dir: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl BatchConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            project_id: None,
            codec: "prores".to_string(),
            output_extension: "mov".to_string(),
            source_dir: PathBuf::from("media"),
            archive_dir: PathBuf::from("old"),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            detection: DetectionMode::Manifest,
            dry_run: false,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            state_dir: None,
        }
    }

    /// Default configuration rooted at `project_dir`
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            ..Self::default_config()
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Check that the configuration describes a usable layout
    pub fn validate(&self) -> Result<()> {
        if self.codec.trim().is_empty() {
            bail!("codec must not be empty");
        }
        if self.output_extension.is_empty() || self.output_extension.contains('.') {
            bail!("output_extension must be a bare extension such as 'mov', got '{}'", self.output_extension);
        }
        if self.extensions.is_empty() {
            bail!("extensions must list at least one source extension");
        }
        if self.source_dir.as_os_str().is_empty() {
            bail!("source_dir must not be empty");
        }
        if !is_plain_relative(&self.archive_dir) {
            bail!(
                "archive_dir must be a relative path inside the source directory, got '{}'",
                self.archive_dir.display()
            );
        }
        if self.resolved_project_id().is_empty() {
            bail!("project_id resolved to an empty string");
        }
        Ok(())
    }

    /// Project identity, falling back to the project directory's name
    pub fn resolved_project_id(&self) -> String {
        if let Some(id) = &self.project_id {
            return id.clone();
        }
        let dir = std::fs::canonicalize(&self.project_dir).unwrap_or_else(|_| self.project_dir.clone());
        dir.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("project")
            .to_string()
    }

    /// Directory scanned for sources
    pub fn source_path(&self) -> PathBuf {
        self.project_dir.join(&self.source_dir)
    }

    /// Directory receiving archived originals
    pub fn archive_path(&self) -> PathBuf {
        self.source_path().join(&self.archive_dir)
    }

    /// Directory holding manifest records
    pub fn state_path(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.project_dir.join(".autotranscode"))
    }

    /// Whether `ext` is one of the configured source extensions
    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}
