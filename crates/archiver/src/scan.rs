use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use walkdir::WalkDir;
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::naming;

/// A source file observed in the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub file_name: String,
    pub stem: String,
    pub size_bytes: u64,
}

impl MediaFile {
    /// Build from a path; `None` if the name is not valid UTF-8
    pub fn from_path(path: &Path, size_bytes: u64) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?.to_string();
        let stem = path.file_stem()?.to_str()?.to_string();
        Some(Self {
            path: path.to_path_buf(),
            file_name,
            stem,
            size_bytes,
        })
    }

    pub fn parent(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }
}

/// Result of scanning a file
#[derive(Debug, Clone)]
pub enum ScanResult {
    /// File should be processed
    Candidate(MediaFile),
    /// File should be skipped (path, reason)
    Skipped(PathBuf, String),
}

/// One fixed view of the source directory, taken at batch start
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Names of every regular file directly under the source directory
    pub listing: Vec<String>,
    pub results: Vec<ScanResult>,
}

impl Snapshot {
    pub fn candidates(&self) -> impl Iterator<Item = &MediaFile> {
        self.results.iter().filter_map(|r| match r {
            ScanResult::Candidate(file) => Some(file),
            ScanResult::Skipped(..) => None,
        })
    }
}

/// Enumerate regular files directly under the source directory, sorted by name.
///
/// Failure to read the directory itself is fatal; problems with single
/// entries are logged and the entry is left out.
pub fn scan_source_dir(cfg: &BatchConfig, project_id: &str) -> Result<Snapshot, BatchError> {
    let root = cfg.source_path();
    if !root.is_dir() {
        return Err(BatchError::Enumerate {
            path: root,
            reason: "not a directory".to_string(),
        });
    }

    info!("Scanning directory: {}", root.display());

    let mut snapshot = Snapshot::default();
    let walker = WalkDir::new(&root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => {
                return Err(BatchError::Enumerate { path: root, reason: e.to_string() });
            }
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        let path = entry.path();

        // Skip directories, including the archive directory
        if !path.is_file() {
            continue;
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("Failed to stat {}: {}", path.display(), e);
                continue;
            }
        };

        let Some(file) = MediaFile::from_path(path, size) else {
            snapshot
                .results
                .push(ScanResult::Skipped(path.to_path_buf(), "file name is not valid UTF-8".to_string()));
            continue;
        };

        snapshot.listing.push(file.file_name.clone());

        if let Some(reason) = skip_reason(cfg, project_id, &file) {
            debug!("Skipping {}: {}", file.file_name, reason);
            snapshot.results.push(ScanResult::Skipped(file.path, reason));
            continue;
        }

        debug!("Found candidate: {} ({} bytes)", file.file_name, file.size_bytes);
        snapshot.results.push(ScanResult::Candidate(file));
    }

    info!(
        "Finished scanning {}: {} files, {} candidates",
        root.display(),
        snapshot.listing.len(),
        snapshot.candidates().count()
    );
    Ok(snapshot)
}

fn skip_reason(cfg: &BatchConfig, project_id: &str, file: &MediaFile) -> Option<String> {
    if file.file_name.starts_with('.') {
        return Some("hidden file".to_string());
    }
    match file.extension() {
        Some(ext) if cfg.accepts_extension(ext) => {}
        Some(ext) => return Some(format!("unsupported extension '{}'", ext)),
        None => return Some("no extension".to_string()),
    }
    if naming::is_canonical_output(&file.file_name, project_id, &cfg.output_extension) {
        return Some("canonical output of an earlier run".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project() -> (tempfile::TempDir, BatchConfig) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("media/old")).unwrap();
        let cfg = BatchConfig {
            project_id: Some("Proj".to_string()),
            ..BatchConfig::for_project(dir.path())
        };
        (dir, cfg)
    }

    #[test]
    fn test_snapshot_is_sorted_and_non_recursive() {
        let (dir, cfg) = project();
        let media = dir.path().join("media");
        fs::write(media.join("b.mp4"), b"bb").unwrap();
        fs::write(media.join("a.MP4"), b"a").unwrap();
        fs::write(media.join("old/archived.mp4"), b"x").unwrap();

        let snapshot = scan_source_dir(&cfg, "Proj").unwrap();
        let names: Vec<_> = snapshot.candidates().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.MP4", "b.mp4"]);
        assert_eq!(snapshot.listing, vec!["a.MP4", "b.mp4"]);

        let b = snapshot.candidates().nth(1).unwrap();
        assert_eq!(b.stem, "b");
        assert_eq!(b.size_bytes, 2);
        assert_eq!(b.parent(), media.as_path());
    }

    #[test]
    fn test_skips_hidden_foreign_and_output_files() {
        let (dir, cfg) = project();
        let media = dir.path().join("media");
        fs::write(media.join(".Proj_A_NA_NA_NA.partial.mov"), b"").unwrap();
        fs::write(media.join("notes.txt"), b"").unwrap();
        fs::write(media.join("Proj_A_10bit_1920x1080_2021-01-01.mov"), b"").unwrap();
        fs::write(media.join("A.mp4"), b"").unwrap();

        let snapshot = scan_source_dir(&cfg, "Proj").unwrap();
        let names: Vec<_> = snapshot.candidates().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["A.mp4"]);
        assert_eq!(snapshot.listing.len(), 4);

        let skipped = snapshot
            .results
            .iter()
            .filter(|r| matches!(r, ScanResult::Skipped(..)))
            .count();
        assert_eq!(skipped, 3);
    }

    #[test]
    fn test_missing_source_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BatchConfig::for_project(dir.path());
        let err = scan_source_dir(&cfg, "Proj").unwrap_err();
        assert!(matches!(err, BatchError::Enumerate { .. }));
    }

    #[test]
    fn test_prefixed_source_is_a_candidate() {
        let (dir, cfg) = project();
        let media = dir.path().join("media");
        fs::write(media.join("Proj_shoot_day1_cam2_take3.mov"), b"raw").unwrap();

        let snapshot = scan_source_dir(&cfg, "Proj").unwrap();
        let names: Vec<_> = snapshot.candidates().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["Proj_shoot_day1_cam2_take3.mov"]);
    }
}
