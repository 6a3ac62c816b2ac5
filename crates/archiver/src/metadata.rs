//! Normalization of probe output into the three naming fields.
//!
//! Each field is produced by its own [`ExtractionRule`]; a rule that cannot
//! produce a value yields [`FieldValue::Missing`] without affecting the others.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use crate::error::ProbeError;
use crate::ffprobe::{FFProbeData, Probe};

/// Placeholder for a field that could not be extracted
pub const SENTINEL: &str = "NA";

/// The metadata fields that take part in canonical names, in name order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    BitDepth,
    Dimensions,
    CreationDate,
}

impl MetadataField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::BitDepth => "bit_depth",
            MetadataField::Dimensions => "dimensions",
            MetadataField::CreationDate => "creation_date",
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a field has no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingReason {
    /// The tag is not present in the probe output
    Absent,
    /// The tag is present but could not be interpreted
    Malformed(String),
    /// The probe itself failed, so no tag could be read
    ProbeFailed(String),
}

/// Typed result of extracting one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Present(String),
    Missing(MissingReason),
}

impl FieldValue {
    /// The value as it appears in a canonical name
    pub fn normalized(&self) -> &str {
        match self {
            FieldValue::Present(value) => value,
            FieldValue::Missing(_) => SENTINEL,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, FieldValue::Present(_))
    }

    fn malformed(detail: impl Into<String>) -> Self {
        FieldValue::Missing(MissingReason::Malformed(detail.into()))
    }
}

/// Normalized naming fields; each is a real value or [`SENTINEL`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metadata {
    pub bit_depth: String,
    pub dimensions: String,
    pub creation_date: String,
}

impl Metadata {
    pub fn new(
        bit_depth: impl Into<String>,
        dimensions: impl Into<String>,
        creation_date: impl Into<String>,
    ) -> Self {
        Self {
            bit_depth: bit_depth.into(),
            dimensions: dimensions.into(),
            creation_date: creation_date.into(),
        }
    }

    /// Metadata with every field set to the sentinel
    pub fn unknown() -> Self {
        Self::new(SENTINEL, SENTINEL, SENTINEL)
    }

    /// Fields in canonical-name order
    pub fn segments(&self) -> [&str; 3] {
        [&self.bit_depth, &self.dimensions, &self.creation_date]
    }
}

/// Pairing of a field with the pure function that extracts it
#[derive(Clone, Copy)]
pub struct ExtractionRule {
    pub field: MetadataField,
    pub extract: fn(&FFProbeData) -> FieldValue,
}

impl fmt::Debug for ExtractionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionRule").field("field", &self.field).finish()
    }
}

/// Extraction rules, iterated in order
pub const EXTRACTION_RULES: &[ExtractionRule] = &[
    ExtractionRule { field: MetadataField::BitDepth, extract: extract_bit_depth },
    ExtractionRule { field: MetadataField::Dimensions, extract: extract_dimensions },
    ExtractionRule { field: MetadataField::CreationDate, extract: extract_creation_date },
];

static ABSENT: FieldValue = FieldValue::Missing(MissingReason::Absent);

/// Per-field outcome of one extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataReport {
    fields: Vec<(MetadataField, FieldValue)>,
}

impl MetadataReport {
    /// Run every rule against probe output
    pub fn from_probe(data: &FFProbeData) -> Self {
        let fields = EXTRACTION_RULES
            .iter()
            .map(|rule| (rule.field, (rule.extract)(data)))
            .collect();
        Self { fields }
    }

    /// Report for a file whose probe call failed outright
    pub fn probe_failed(err: &ProbeError) -> Self {
        let reason = err.to_string();
        let fields = EXTRACTION_RULES
            .iter()
            .map(|rule| (rule.field, FieldValue::Missing(MissingReason::ProbeFailed(reason.clone()))))
            .collect();
        Self { fields }
    }

    pub fn get(&self, field: MetadataField) -> &FieldValue {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v)
            .unwrap_or(&ABSENT)
    }

    /// Fields that fell back to the sentinel, with the reason
    pub fn missing(&self) -> impl Iterator<Item = (MetadataField, &MissingReason)> {
        self.fields.iter().filter_map(|(field, value)| match value {
            FieldValue::Missing(reason) => Some((*field, reason)),
            FieldValue::Present(_) => None,
        })
    }

    /// Collapse to the normalized string form used for naming
    pub fn normalized(&self) -> Metadata {
        Metadata::new(
            self.get(MetadataField::BitDepth).normalized(),
            self.get(MetadataField::Dimensions).normalized(),
            self.get(MetadataField::CreationDate).normalized(),
        )
    }
}

/// Wraps the probe collaborator and applies the extraction rules
#[derive(Clone)]
pub struct MetadataExtractor {
    probe: Arc<dyn Probe>,
}

impl MetadataExtractor {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self { probe }
    }

    /// Probe `path` once and extract every field. Never fails; missing
    /// fields are reported in the returned [`MetadataReport`].
    pub async fn extract(&self, path: &Path) -> MetadataReport {
        let report = match self.probe.probe(path).await {
            Ok(data) => MetadataReport::from_probe(&data),
            Err(e) => {
                warn!("{} failed for {}: {}", self.probe.name(), path.display(), e);
                MetadataReport::probe_failed(&e)
            }
        };

        for (field, reason) in report.missing() {
            debug!("{}: {} unavailable ({:?}), using {}", path.display(), field, reason, SENTINEL);
        }

        report
    }
}

fn extract_bit_depth(data: &FFProbeData) -> FieldValue {
    let Some(stream) = data.primary_stream() else {
        return FieldValue::Missing(MissingReason::Absent);
    };
    match stream.bits_per_raw_sample.as_deref().map(str::trim) {
        None => FieldValue::Missing(MissingReason::Absent),
        Some(raw) => match raw.parse::<u32>() {
            Ok(bits) if bits > 0 => FieldValue::Present(format!("{}bit", bits)),
            _ => FieldValue::malformed(format!("bits_per_raw_sample = {:?}", raw)),
        },
    }
}

fn extract_dimensions(data: &FFProbeData) -> FieldValue {
    let Some(stream) = data.primary_stream() else {
        return FieldValue::Missing(MissingReason::Absent);
    };
    let width = stream.coded_width.or(stream.width);
    let height = stream.coded_height.or(stream.height);
    match (width, height) {
        (None, None) => FieldValue::Missing(MissingReason::Absent),
        (Some(w), Some(h)) if w > 0 && h > 0 => FieldValue::Present(format!("{}x{}", w, h)),
        (w, h) => FieldValue::malformed(format!("width = {:?}, height = {:?}", w, h)),
    }
}

fn extract_creation_date(data: &FFProbeData) -> FieldValue {
    let raw = data
        .primary_stream()
        .and_then(|s| s.tag("creation_time"))
        .or_else(|| data.format_tag("creation_time"));
    match raw {
        None => FieldValue::Missing(MissingReason::Absent),
        Some(raw) => match parse_creation_date(raw) {
            Some(date) => FieldValue::Present(date.format("%Y-%m-%d").to_string()),
            None => FieldValue::malformed(format!("creation_time = {:?}", raw)),
        },
    }
}

/// Parse a container timestamp into its calendar date, keeping the
/// timestamp's own offset
pub fn parse_creation_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}
