pub mod config;
pub mod error;
pub mod ffprobe;
pub mod metadata;
pub mod naming;
pub mod scan;
pub mod manifest;
pub mod detector;
pub mod transcode;
pub mod archive;
pub mod batch;
pub mod testing;

pub use config::{BatchConfig, DetectionMode};
pub use error::{ArchiveError, BatchError, ManifestError, ProbeError, TranscodeError};
pub use ffprobe::{FFProbeData, FFProbeFormat, FFProbeStream, FfprobeProbe, Probe};
pub use metadata::{Metadata, MetadataExtractor, MetadataField, MetadataReport};
pub use naming::CanonicalName;
pub use manifest::{FileState, Manifest, ManifestRecord};
pub use detector::{Detection, ProcessedSetDetector};
pub use transcode::{FfmpegTranscoder, TranscodeJob, TranscodeOutcome, Transcoder};
pub use archive::{ArchiveMover, ArchiveRecord};
pub use batch::{run_batch, BatchOrchestrator, BatchReport, FileReport};
