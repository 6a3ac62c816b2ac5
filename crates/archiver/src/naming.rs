use std::fmt;
use std::sync::LazyLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use crate::metadata::Metadata;

/// Separator between canonical name segments
pub const SEPARATOR: &str = "_";

// `<stem>_<bits>_<dims>_<date>`, each metadata segment either a value of the
// shape the extractor produces or the sentinel
static OUTPUT_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stem>.+)_(?:\d+bit|NA)_(?:\d+x\d+|NA)_(?:\d{4}-\d{2}-\d{2}|NA)$").unwrap()
});

/// Deterministic output file name: `<project>_<stem>_<bits>_<dims>_<date>.<ext>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalName(String);

impl CanonicalName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compose the canonical name for a source file.
///
/// `extension` may be given with or without its leading dot. Segment values
/// are used verbatim; characters that are illegal on the target filesystem
/// are not escaped.
pub fn compose(project_id: &str, stem: &str, metadata: &Metadata, extension: &str) -> CanonicalName {
    let [bit_depth, dimensions, creation_date] = metadata.segments();
    let fields = [project_id, stem, bit_depth, dimensions, creation_date];

    let mut name = fields.join(SEPARATOR);
    let extension = extension.trim_start_matches('.');
    if !extension.is_empty() {
        name.push('.');
        name.push_str(extension);
    }
    CanonicalName(name)
}

/// Leading part shared by every canonical name for `stem` in `project_id`
pub fn canonical_prefix(project_id: &str, stem: &str) -> String {
    format!("{}{}{}{}", project_id, SEPARATOR, stem, SEPARATOR)
}

/// Source stem of `file_name` if it is a canonical output of `project_id`:
/// `<project>_<stem>_<bits>_<dims>_<date>.<extension>` with metadata-shaped
/// trailing segments
pub fn output_source_stem<'a>(file_name: &'a str, project_id: &str, extension: &str) -> Option<&'a str> {
    let extension = extension.trim_start_matches('.');
    let (base, ext) = file_name.rsplit_once('.')?;
    if !ext.eq_ignore_ascii_case(extension) {
        return None;
    }
    let rest = base.strip_prefix(project_id)?.strip_prefix(SEPARATOR)?;
    OUTPUT_TAIL.captures(rest)?.name("stem").map(|m| m.as_str())
}

/// Whether `file_name` looks like an output this project produced
pub fn is_canonical_output(file_name: &str, project_id: &str, extension: &str) -> bool {
    output_source_stem(file_name, project_id, extension).is_some()
}

/// Whether `file_name` is the canonical output of the source with `stem`
pub fn is_output_for(file_name: &str, project_id: &str, stem: &str, extension: &str) -> bool {
    output_source_stem(file_name, project_id, extension) == Some(stem)
}
