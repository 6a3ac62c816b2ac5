//! Persisted processing records, one JSON file per source file.
//!
//! The manifest is keyed by the source file's base name, the stable identifier
//! of an original within a project's source directory.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::error::ManifestError;

/// Lifecycle of one source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    Skipped,
    Transcoding,
    Transcoded,
    Archiving,
    Archived,
    TranscodeFailed,
    ArchiveFailed,
    /// Dry run only; never persisted
    Planned,
}

impl FileState {
    pub fn is_failure(&self) -> bool {
        matches!(self, FileState::TranscodeFailed | FileState::ArchiveFailed)
    }

    /// States in which a transcoded output should already exist
    pub fn has_output(&self) -> bool {
        matches!(self, FileState::Transcoded | FileState::Archiving | FileState::ArchiveFailed)
    }

    /// Short label for compact displays
    pub fn short_label(&self) -> &'static str {
        match self {
            FileState::Pending => "PEND",
            FileState::Skipped => "SKIP",
            FileState::Transcoding => "ENC",
            FileState::Transcoded => "DONE",
            FileState::Archiving => "ARCH",
            FileState::Archived => "OK",
            FileState::TranscodeFailed => "EFAIL",
            FileState::ArchiveFailed => "AFAIL",
            FileState::Planned => "PLAN",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileState::Pending => "pending",
            FileState::Skipped => "skipped",
            FileState::Transcoding => "transcoding",
            FileState::Transcoded => "transcoded",
            FileState::Archiving => "archiving",
            FileState::Archived => "archived",
            FileState::TranscodeFailed => "transcode_failed",
            FileState::ArchiveFailed => "archive_failed",
            FileState::Planned => "planned",
        };
        f.write_str(s)
    }
}

/// Processing record for one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub id: String,
    /// Batch run that last touched this record
    pub run_id: String,
    pub source_name: String,
    pub state: FileState,
    pub output_name: Option<String>,
    pub original_bytes: Option<u64>,
    pub output_bytes: Option<u64>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManifestRecord {
    pub fn new(source_name: impl Into<String>, run_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            source_name: source_name.into(),
            state: FileState::Pending,
            output_name: None,
            original_bytes: None,
            output_bytes: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `state`, replacing the reason
    pub fn transition(&mut self, state: FileState, reason: Option<String>) {
        self.state = state;
        self.reason = reason;
        self.updated_at = Utc::now();
    }
}

/// Path of the JSON file holding record `id`
pub fn record_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.json", id))
}

/// Write a record atomically (temp file, then rename)
pub fn save_record(record: &ManifestRecord, dir: &Path) -> Result<(), ManifestError> {
    fs::create_dir_all(dir).map_err(|source| ManifestError::Io { path: dir.to_path_buf(), source })?;

    let json = serde_json::to_string_pretty(record)
        .map_err(|source| ManifestError::Serialize { id: record.id.clone(), source })?;

    let final_path = record_path(dir, &record.id);
    let temp_path = dir.join(format!(".{}.json.tmp", record.id));
    fs::write(&temp_path, json).map_err(|source| ManifestError::Io { path: temp_path.clone(), source })?;
    fs::rename(&temp_path, &final_path).map_err(|source| ManifestError::Io { path: final_path, source })?;
    Ok(())
}

/// Load every record in `dir`; a missing directory is an empty manifest.
/// Unreadable or unparseable files are skipped with a warning.
pub fn load_all_records(dir: &Path) -> Result<Vec<ManifestRecord>, ManifestError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir).map_err(|source| ManifestError::Io { path: dir.to_path_buf(), source })?;
    let mut records = Vec::new();

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading manifest entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read manifest record {}: {}", path.display(), e);
                continue;
            }
        };
        match serde_json::from_str::<ManifestRecord>(&content) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Failed to parse manifest record {}: {}", path.display(), e),
        }
    }

    Ok(records)
}

/// In-memory index of manifest records by source name
#[derive(Debug)]
pub struct Manifest {
    dir: PathBuf,
    read_only: bool,
    records: HashMap<String, ManifestRecord>,
}

impl Manifest {
    /// Load the manifest stored in `dir`
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let mut records: HashMap<String, ManifestRecord> = HashMap::new();
        for record in load_all_records(dir)? {
            // Keep the most recently updated record per source
            match records.get(&record.source_name) {
                Some(existing) if existing.updated_at >= record.updated_at => {
                    debug!("Ignoring stale manifest record {} for {}", record.id, record.source_name);
                }
                _ => {
                    records.insert(record.source_name.clone(), record);
                }
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            read_only: false,
            records,
        })
    }

    /// Manifest with no records, bound to `dir`
    pub fn empty(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            read_only: false,
            records: HashMap::new(),
        }
    }

    /// Keep updates in memory only
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, source_name: &str) -> Option<&ManifestRecord> {
        self.records.get(source_name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ManifestRecord> {
        self.records.values()
    }

    /// Apply `update` to the record for `source_name` (creating it if needed),
    /// stamp it with `run_id`, and persist it
    pub fn update<F>(&mut self, source_name: &str, run_id: &str, update: F) -> Result<&ManifestRecord, ManifestError>
    where
        F: FnOnce(&mut ManifestRecord),
    {
        let record = self
            .records
            .entry(source_name.to_string())
            .or_insert_with(|| ManifestRecord::new(source_name, run_id));
        record.run_id = run_id.to_string();
        update(record);

        if !self.read_only {
            save_record(record, &self.dir)?;
        }
        Ok(record)
    }
}
