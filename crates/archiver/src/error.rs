use std::path::PathBuf;
use thiserror::Error;

/// Failure of the external probe for a whole file
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("file does not exist: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to execute ffprobe for {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ffprobe exited with code {exit_code} for {}: {stderr}", .path.display())]
    Failed {
        path: PathBuf,
        exit_code: i32,
        stderr: String,
    },

    #[error("failed to parse ffprobe output for {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of the external transcoder for one file
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to execute ffmpeg for {}: {source}", .input.display())]
    Spawn {
        input: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg exited with code {exit_code} for {}", .input.display())]
    Failed {
        input: PathBuf,
        exit_code: i32,
        stderr: String,
    },

    #[error("transcoder reported success but produced no output at {}", .output.display())]
    MissingOutput { output: PathBuf },

    #[error("output already exists: {}", .output.display())]
    OutputExists { output: PathBuf },

    #[error("I/O error while finalizing {}: {source}", .output.display())]
    Finalize {
        output: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to move an original into the archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The destination already exists; neither file was touched.
    #[error("archive destination already exists: {}", .destination.display())]
    Collision { destination: PathBuf },

    #[error("original has no file name: {}", .original.display())]
    NoFileName { original: PathBuf },

    #[error("failed to create archive destination {}: {source}", .destination.display())]
    Create {
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy {} -> {}: {source}", .original.display(), .destination.display())]
    Copy {
        original: PathBuf,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("copied {copied} of {expected} bytes from {}", .original.display())]
    ShortCopy {
        original: PathBuf,
        copied: u64,
        expected: u64,
    },

    #[error("archived copy written but failed to remove original {}: {source}", .original.display())]
    RemoveSource {
        original: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    /// Whether this failure was a name collision at the destination
    pub fn is_collision(&self) -> bool {
        matches!(self, Self::Collision { .. })
    }
}

/// Failure to read or write the processing manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error on manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize manifest record {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Conditions that abort a whole batch
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("cannot enumerate source directory {}: {reason}", .path.display())]
    Enumerate { path: PathBuf, reason: String },
}
