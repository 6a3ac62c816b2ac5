use log::debug;
use crate::config::DetectionMode;
use crate::manifest::{FileState, Manifest};
use crate::naming::{self, SEPARATOR};
use crate::scan::MediaFile;

/// Legacy heuristic: true when the second `_` token of the candidate's stem
/// appears inside the name of any other listing entry.
///
/// Prone to false positives when unrelated names share a token, and blind to
/// outputs that have already left the listing.
pub fn is_processed<S: AsRef<str>>(candidate: &str, listing: &[S]) -> bool {
    matching_entry(candidate, listing).is_some()
}

fn matching_entry<'a, S: AsRef<str>>(candidate: &str, listing: &'a [S]) -> Option<(&'a str, String)> {
    let stem = candidate.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(candidate);
    let token = stem.split(SEPARATOR).nth(1)?;
    if token.is_empty() {
        return None;
    }
    listing
        .iter()
        .map(|entry| entry.as_ref())
        .find(|entry| *entry != candidate && entry.contains(token))
        .map(|entry| (entry, token.to_string()))
}

/// Outcome of checking one candidate against earlier runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Never processed, or a previous attempt failed before producing output
    Fresh,
    /// The manifest records this source as archived
    AlreadyArchived,
    /// This source's canonical output is already in the source directory;
    /// only archiving remains
    OutputPresent { output_name: String },
    /// Legacy token heuristic matched another listing entry
    TokenMatch { token: String, matched: String },
}

impl Detection {
    /// Whether the transcode step must not run for this file
    pub fn skips_transcode(&self) -> bool {
        !matches!(self, Detection::Fresh)
    }
}

/// Decides whether a candidate was handled by an earlier run
#[derive(Debug, Clone)]
pub struct ProcessedSetDetector {
    mode: DetectionMode,
    project_id: String,
    output_extension: String,
}

impl ProcessedSetDetector {
    pub fn new(mode: DetectionMode, project_id: impl Into<String>, output_extension: impl Into<String>) -> Self {
        Self {
            mode,
            project_id: project_id.into(),
            output_extension: output_extension.into(),
        }
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn detect(&self, file: &MediaFile, listing: &[String], manifest: &Manifest) -> Detection {
        let detection = match self.mode {
            DetectionMode::Token => match matching_entry(&file.file_name, listing) {
                Some((matched, token)) => Detection::TokenMatch { token, matched: matched.to_string() },
                None => Detection::Fresh,
            },
            DetectionMode::Manifest => self.detect_with_manifest(file, listing, manifest),
        };
        debug!("{}: detection = {:?}", file.file_name, detection);
        detection
    }

    fn detect_with_manifest(&self, file: &MediaFile, listing: &[String], manifest: &Manifest) -> Detection {
        if let Some(record) = manifest.get(&file.file_name) {
            if record.state == FileState::Archived {
                return Detection::AlreadyArchived;
            }
            if record.state.has_output() {
                if let Some(output) = &record.output_name {
                    if listing.iter().any(|entry| entry == output) {
                        return Detection::OutputPresent { output_name: output.clone() };
                    }
                }
            }
        }

        listing
            .iter()
            .find(|entry| {
                *entry != &file.file_name
                    && naming::is_output_for(entry, &self.project_id, &file.stem, &self.output_extension)
                    && !claimed_by_other(manifest, entry, &file.file_name)
            })
            .map(|entry| Detection::OutputPresent { output_name: entry.clone() })
            .unwrap_or(Detection::Fresh)
    }
}

// Output recorded in the manifest as produced from a different source
fn claimed_by_other(manifest: &Manifest, output: &str, source_name: &str) -> bool {
    manifest
        .records()
        .any(|r| r.source_name != source_name && r.output_name.as_deref() == Some(output))
}
