//! Relocation of processed originals into the archive directory.
//!
//! The destination is created exclusively, filled with a full copy of the
//! original, synced, and only then is the original removed. A collision or a
//! failed copy leaves the original untouched and no partial archive file.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use crate::error::ArchiveError;

/// An original that now lives in the archive under its original base name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub original: PathBuf,
    pub destination: PathBuf,
    pub bytes: u64,
}

/// Move `original` to `archive_dir/<base name>` without ever overwriting.
pub fn archive(original: &Path, archive_dir: &Path) -> Result<ArchiveRecord, ArchiveError> {
    let file_name = original
        .file_name()
        .ok_or_else(|| ArchiveError::NoFileName { original: original.to_path_buf() })?;
    let destination = archive_dir.join(file_name);

    let copy_err = |source: io::Error| copy_error(original, &destination, source);

    let source_file = File::open(original).map_err(copy_err)?;
    let expected = source_file.metadata().map_err(copy_err)?.len();

    let dest_file = match OpenOptions::new().write(true).create_new(true).open(&destination) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(ArchiveError::Collision { destination: destination.clone() });
        }
        Err(source) => {
            return Err(ArchiveError::Create { destination: destination.clone(), source });
        }
    };

    debug!("Archiving {} -> {} ({} bytes)", original.display(), destination.display(), expected);

    let copied = match copy_contents(source_file, dest_file) {
        Ok(n) => n,
        Err(e) => {
            discard_partial(&destination);
            return Err(copy_err(e));
        }
    };

    if copied != expected {
        discard_partial(&destination);
        return Err(ArchiveError::ShortCopy {
            original: original.to_path_buf(),
            copied,
            expected,
        });
    }

    fs::remove_file(original).map_err(|source| ArchiveError::RemoveSource {
        original: original.to_path_buf(),
        source,
    })?;

    info!("Archived {} -> {}", original.display(), destination.display());
    Ok(ArchiveRecord {
        original: original.to_path_buf(),
        destination,
        bytes: copied,
    })
}

fn copy_error(original: &Path, destination: &Path, source: io::Error) -> ArchiveError {
    ArchiveError::Copy {
        original: original.to_path_buf(),
        destination: destination.to_path_buf(),
        source,
    }
}

fn copy_contents(source: File, dest: File) -> io::Result<u64> {
    let mut reader = BufReader::new(source);
    let mut writer = BufWriter::new(dest);
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    let dest = writer.into_inner().map_err(|e| e.into_error())?;
    dest.sync_all()?;
    Ok(copied)
}

// Only called on a destination this call created
fn discard_partial(destination: &Path) {
    if let Err(e) = fs::remove_file(destination) {
        warn!("Failed to remove partial archive file {}: {}", destination.display(), e);
    }
}

/// One async lock per archive destination
#[derive(Debug, Clone, Default)]
pub struct ArchiveLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ArchiveLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock guarding `destination`; the same path always yields the same lock
    pub fn lock_for(&self, destination: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(destination.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Archives originals into one directory, serialized per destination
#[derive(Debug, Clone)]
pub struct ArchiveMover {
    archive_dir: PathBuf,
    locks: ArchiveLocks,
}

impl ArchiveMover {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self::with_locks(archive_dir, ArchiveLocks::new())
    }

    pub fn with_locks(archive_dir: impl Into<PathBuf>, locks: ArchiveLocks) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            locks,
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Where `original` would land in the archive
    pub fn destination_for(&self, original: &Path) -> Option<PathBuf> {
        original.file_name().map(|name| self.archive_dir.join(name))
    }

    pub async fn archive(&self, original: &Path) -> Result<ArchiveRecord, ArchiveError> {
        let destination = self
            .destination_for(original)
            .ok_or_else(|| ArchiveError::NoFileName { original: original.to_path_buf() })?;
        let lock = self.locks.lock_for(&destination);
        let _guard = lock.lock().await;
        archive(original, &self.archive_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        let old = media.join("old");
        fs::create_dir_all(&old).unwrap();
        (dir, media, old)
    }

    #[test]
    fn test_archive_moves_bytes() {
        let (_dir, media, old) = layout();
        let original = media.join("A.mp4");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&original, &payload).unwrap();

        let record = archive(&original, &old).unwrap();
        assert_eq!(record.destination, old.join("A.mp4"));
        assert_eq!(record.bytes, payload.len() as u64);
        assert!(!original.exists());
        assert_eq!(fs::read(old.join("A.mp4")).unwrap(), payload);
    }

    #[test]
    fn test_collision_leaves_both_files_untouched() {
        let (_dir, media, old) = layout();
        let original = media.join("A.mp4");
        fs::write(&original, b"new original").unwrap();
        fs::write(old.join("A.mp4"), b"earlier archive").unwrap();

        let err = archive(&original, &old).unwrap_err();
        assert!(err.is_collision());
        assert_eq!(fs::read(&original).unwrap(), b"new original");
        assert_eq!(fs::read(old.join("A.mp4")).unwrap(), b"earlier archive");
    }

    #[test]
    fn test_missing_archive_dir_keeps_original() {
        let (_dir, media, _old) = layout();
        let original = media.join("A.mp4");
        fs::write(&original, b"data").unwrap();

        let err = archive(&original, &media.join("missing")).unwrap_err();
        assert!(matches!(err, ArchiveError::Create { .. }));
        assert_eq!(fs::read(&original).unwrap(), b"data");
    }

    #[test]
    fn test_missing_original_creates_nothing() {
        let (_dir, media, old) = layout();
        let err = archive(&media.join("ghost.mp4"), &old).unwrap_err();
        assert!(matches!(err, ArchiveError::Copy { .. }));
        assert!(!old.join("ghost.mp4").exists());
    }

    #[test]
    fn test_locks_are_shared_per_destination() {
        let locks = ArchiveLocks::new();
        let a = locks.lock_for(Path::new("/m/old/A.mp4"));
        let a_again = locks.lock_for(Path::new("/m/old/A.mp4"));
        let b = locks.lock_for(Path::new("/m/old/B.mp4"));
        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_concurrent_archives_to_same_destination() {
        let (dir, media, old) = layout();
        let other = dir.path().join("other");
        fs::create_dir_all(&other).unwrap();
        fs::write(media.join("A.mp4"), b"first").unwrap();
        fs::write(other.join("A.mp4"), b"second").unwrap();

        let mover = ArchiveMover::new(&old);
        let src1 = media.join("A.mp4");
        let src2 = other.join("A.mp4");
        let (r1, r2) = tokio::join!(mover.archive(&src1), mover.archive(&src2));

        // Exactly one wins; the loser collides and keeps its original
        assert!(r1.is_ok() != r2.is_ok());
        let archived = fs::read(old.join("A.mp4")).unwrap();
        if r1.is_ok() {
            assert_eq!(archived, b"first");
            assert!(r2.unwrap_err().is_collision());
            assert_eq!(fs::read(other.join("A.mp4")).unwrap(), b"second");
        } else {
            assert_eq!(archived, b"second");
            assert!(r1.unwrap_err().is_collision());
            assert_eq!(fs::read(media.join("A.mp4")).unwrap(), b"first");
        }
    }
}
