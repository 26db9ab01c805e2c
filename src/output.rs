//! Result types produced by a batch run.

use crate::error::ItemError;
use serde::Serialize;

/// One input image as handed to the normaliser: raw bytes plus a display name.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl SourceImage {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// A successfully analysed image.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRecord {
    pub filename: String,
    pub subject_id: String,
    /// The model's free-text analysis, tidied but otherwise verbatim.
    pub analysis_text: String,
    /// Base64 JPEG exactly as it was sent to the model.
    #[serde(skip)]
    pub encoded_image: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub retries: u32,
    pub duration_ms: u64,
}

/// One card in the report, in input order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportEntry {
    Analysed(AnalysisRecord),
    Unavailable {
        filename: String,
        subject_id: String,
        /// Present when normalisation succeeded but analysis did not.
        #[serde(skip)]
        encoded_image: Option<String>,
        reason: ItemError,
    },
}

impl ReportEntry {
    pub fn filename(&self) -> &str {
        match self {
            ReportEntry::Analysed(r) => &r.filename,
            ReportEntry::Unavailable { filename, .. } => filename,
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            ReportEntry::Analysed(r) => &r.subject_id,
            ReportEntry::Unavailable { subject_id, .. } => subject_id,
        }
    }

    pub fn encoded_image(&self) -> Option<&str> {
        match self {
            ReportEntry::Analysed(r) => Some(&r.encoded_image),
            ReportEntry::Unavailable { encoded_image, .. } => encoded_image.as_deref(),
        }
    }

    pub fn error(&self) -> Option<&ItemError> {
        match self {
            ReportEntry::Analysed(_) => None,
            ReportEntry::Unavailable { reason, .. } => Some(reason),
        }
    }

    pub fn is_analysed(&self) -> bool {
        matches!(self, ReportEntry::Analysed(_))
    }
}

/// Aggregate numbers for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total_images: usize,
    pub analysed_images: usize,
    pub failed_images: usize,
    /// Images that never got past loading or decoding.
    pub undecodable_images: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
    pub analysis_duration_ms: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutput {
    /// The rendered HTML report.
    #[serde(skip)]
    pub html: String,
    pub entries: Vec<ReportEntry>,
    pub stats: BatchStats,
}
