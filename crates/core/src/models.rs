use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Docx,
    Doc,
    Txt,
    Rtf,
    #[default]
    Unknown,
}

impl DocumentType {
    pub const SUPPORTED: [DocumentType; 5] = [
        DocumentType::Pdf,
        DocumentType::Docx,
        DocumentType::Doc,
        DocumentType::Txt,
        DocumentType::Rtf,
    ];

    /// Detects the type from the file-name suffix, case-insensitively.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }

    pub fn from_extension(extension: &str) -> Self {
        let extension = extension.trim_start_matches('.');
        Self::SUPPORTED
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(extension))
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Doc => "doc",
            Self::Txt => "txt",
            Self::Rtf => "rtf",
            Self::Unknown => "unknown",
        }
    }

    /// Suffix including the leading dot; empty for `Unknown`.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => ".pdf",
            Self::Docx => ".docx",
            Self::Doc => ".doc",
            Self::Txt => ".txt",
            Self::Rtf => ".rtf",
            Self::Unknown => "",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar that the storage layer accepts as a metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Flattens an arbitrary JSON value into a scalar. Arrays and objects become
/// their JSON text.
impl From<serde_json::Value> for MetadataValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(flag) => Self::Bool(flag),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map(Self::Integer)
                .or_else(|| number.as_f64().map(Self::Float))
                .unwrap_or_else(|| Self::Text(number.to_string())),
            serde_json::Value::String(text) => Self::Text(text),
            serde_json::Value::Null => Self::Text("null".to_string()),
            other => Self::Text(other.to_string()),
        }
    }
}

/// Flat key/value metadata as handed to the vector index.
pub type FlatMetadata = BTreeMap<String, MetadataValue>;

/// Flat metadata keys written by the pipeline.
pub mod keys {
    pub const SOURCE: &str = "source";
    pub const DOCUMENT_TYPE: &str = "document_type";
    pub const PAGE_COUNT: &str = "page_count";
    pub const TOTAL_CHARS: &str = "total_chars";
    pub const FISCAL_YEAR: &str = "fiscal_year";
    pub const PATIENT_ID: &str = "patient_id";
    pub const INGESTED_AT: &str = "ingested_at";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const START_CHAR: &str = "start_char";
    pub const END_CHAR: &str = "end_char";
    pub const TOTAL_CHUNKS: &str = "total_chunks";

    pub const RESERVED: [&str; 11] = [
        SOURCE,
        DOCUMENT_TYPE,
        PAGE_COUNT,
        TOTAL_CHARS,
        FISCAL_YEAR,
        PATIENT_ID,
        INGESTED_AT,
        CHUNK_INDEX,
        START_CHAR,
        END_CHAR,
        TOTAL_CHUNKS,
    ];
}

/// Caller-supplied labels attached to every chunk of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraMetadata {
    pub fiscal_year: Option<String>,
    pub patient_id: Option<String>,
    /// Pass-through values. Keys that collide with pipeline keys are stored
    /// under an `extra_` prefix instead of overwriting them.
    pub values: BTreeMap<String, serde_json::Value>,
}

impl ExtraMetadata {
    pub fn for_patient(patient_id: impl Into<String>, fiscal_year: impl Into<String>) -> Self {
        Self {
            fiscal_year: Some(fiscal_year.into()),
            patient_id: Some(patient_id.into()),
            values: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub document_type: DocumentType,
    pub page_count: u32,
    pub total_chars: usize,
    pub fiscal_year: Option<String>,
    pub patient_id: Option<String>,
    pub ingested_at: Option<String>,
    pub chunk_index: Option<usize>,
    pub start_char: Option<usize>,
    pub end_char: Option<usize>,
    pub total_chunks: Option<usize>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ChunkMetadata {
    pub fn with_position(&self, chunk_index: usize, start_char: usize, end_char: usize) -> Self {
        Self {
            chunk_index: Some(chunk_index),
            start_char: Some(start_char),
            end_char: Some(end_char),
            ..self.clone()
        }
    }

    pub fn flatten(&self) -> FlatMetadata {
        let mut flat = FlatMetadata::new();
        flat.insert(keys::SOURCE.to_string(), self.source.clone().into());
        flat.insert(
            keys::DOCUMENT_TYPE.to_string(),
            self.document_type.as_str().into(),
        );
        flat.insert(keys::PAGE_COUNT.to_string(), self.page_count.into());
        flat.insert(keys::TOTAL_CHARS.to_string(), self.total_chars.into());

        let optional_text = [
            (keys::FISCAL_YEAR, &self.fiscal_year),
            (keys::PATIENT_ID, &self.patient_id),
            (keys::INGESTED_AT, &self.ingested_at),
        ];
        for (key, value) in optional_text {
            if let Some(value) = value {
                flat.insert(key.to_string(), value.clone().into());
            }
        }

        let optional_counts = [
            (keys::CHUNK_INDEX, self.chunk_index),
            (keys::START_CHAR, self.start_char),
            (keys::END_CHAR, self.end_char),
            (keys::TOTAL_CHUNKS, self.total_chunks),
        ];
        for (key, value) in optional_counts {
            if let Some(value) = value {
                flat.insert(key.to_string(), value.into());
            }
        }

        for (key, value) in &self.extra {
            let key = if keys::RESERVED.contains(&key.as_str()) {
                format!("extra_{key}")
            } else {
                key.clone()
            };
            flat.entry(key)
                .or_insert_with(|| MetadataValue::from(value.clone()));
        }

        flat
    }
}

/// A contiguous span of extracted text prepared for indexing.
///
/// `start_char..end_char` is a half-open range of character (not byte)
/// offsets into the extracted text and covers exactly the trimmed `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
}

impl DocumentChunk {
    pub fn char_count(&self) -> usize {
        self.end_char - self.start_char
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedDocument {
    pub source_path: String,
    pub document_type: DocumentType,
    pub total_chars: usize,
    pub total_pages: u32,
    pub raw_text: String,
    pub chunks: Vec<DocumentChunk>,
    pub metadata: ChunkMetadata,
    pub success: bool,
    pub error_message: Option<String>,
}

impl ProcessedDocument {
    pub fn failed(source_path: String, document_type: DocumentType, message: String) -> Self {
        Self {
            source_path,
            document_type,
            total_chars: 0,
            total_pages: 0,
            raw_text: String::new(),
            chunks: Vec::new(),
            metadata: ChunkMetadata::default(),
            success: false,
            error_message: Some(message),
        }
    }
}

/// One chunk returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub text: String,
    pub metadata: FlatMetadata,
    /// Non-negative; smaller is more similar.
    pub distance: f64,
    pub doc_id: String,
}

impl RetrievalResult {
    pub fn relevance_score(&self) -> f64 {
        relevance_score(self.distance)
    }

    pub fn source(&self) -> &str {
        self.metadata
            .get(keys::SOURCE)
            .and_then(MetadataValue::as_str)
            .unwrap_or("Unknown")
    }
}

/// `1 / (1 + distance)`: 1.0 at distance 0, strictly decreasing after.
pub fn relevance_score(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagContext {
    pub query: String,
    /// Included chunks, in rank order.
    pub retrieved_chunks: Vec<RetrievalResult>,
    /// Candidates considered before the budget cut.
    pub total_chunks: usize,
    pub context_text: String,
    /// Distinct sources of the included chunks, in first-seen order.
    pub sources: Vec<String>,
    pub chars_used: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    FullSummary,
    ProgressSummary,
    MedicationReview,
    DischargeSummary,
    AssessmentSummary,
}

impl ReportType {
    pub const ALL: [ReportType; 5] = [
        ReportType::FullSummary,
        ReportType::ProgressSummary,
        ReportType::MedicationReview,
        ReportType::DischargeSummary,
        ReportType::AssessmentSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullSummary => "full_summary",
            Self::ProgressSummary => "progress_summary",
            Self::MedicationReview => "medication_review",
            Self::DischargeSummary => "discharge_summary",
            Self::AssessmentSummary => "assessment_summary",
        }
    }

    /// "medication_review" -> "Medication Review".
    pub fn display_name(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut letters = word.chars();
                match letters.next() {
                    Some(first) => first.to_uppercase().chain(letters).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown report type `{0}`")]
pub struct ParseReportTypeError(String);

impl FromStr for ReportType {
    type Err = ParseReportTypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ParseReportTypeError(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Llm,
    Structured,
    NoContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMetadata {
    pub total_retrieved: usize,
    pub chars_used: usize,
    pub query: String,
    pub mode: GenerationMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedReport {
    pub report_type: ReportType,
    pub content: String,
    pub context_used: usize,
    pub sources: Vec<String>,
    pub metadata: ReportMetadata,
}

/// One document offered by a [`crate::source::DocumentSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Lower-cased, with the leading dot.
    pub extension: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    #[default]
    FixedSize,
    Paragraph,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub strategy: ChunkingStrategy,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            min_chunk_size: 100,
            strategy: ChunkingStrategy::FixedSize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_type_detection_falls_back_to_unknown() {
        assert_eq!(DocumentType::from_path(Path::new("a/Note.PDF")), DocumentType::Pdf);
        assert_eq!(DocumentType::from_path(Path::new("plan.docx")), DocumentType::Docx);
        assert_eq!(DocumentType::from_path(Path::new("old.doc")), DocumentType::Doc);
        assert_eq!(DocumentType::from_path(Path::new("x.rtf")), DocumentType::Rtf);
        assert_eq!(DocumentType::from_path(Path::new("image.png")), DocumentType::Unknown);
        assert_eq!(DocumentType::from_path(Path::new("README")), DocumentType::Unknown);
        assert_eq!(DocumentType::from_extension(".TXT"), DocumentType::Txt);
    }

    #[test]
    fn relevance_score_is_one_at_zero_and_decreasing() {
        assert_eq!(relevance_score(0.0), 1.0);
        assert_eq!(relevance_score(1.0), 0.5);
        let distances = [0.0, 0.1, 0.5, 1.0, 2.0, 10.0];
        for pair in distances.windows(2) {
            assert!(relevance_score(pair[0]) > relevance_score(pair[1]));
        }
    }

    #[test]
    fn flatten_turns_nested_values_into_strings() {
        let mut metadata = ChunkMetadata {
            source: "admission_summary.txt".to_string(),
            document_type: DocumentType::Txt,
            page_count: 1,
            total_chars: 120,
            patient_id: Some("patient-7".to_string()),
            ..ChunkMetadata::default()
        }
        .with_position(2, 10, 90);
        metadata
            .extra
            .insert("tags".to_string(), serde_json::json!(["intake", "adult"]));
        metadata
            .extra
            .insert("reviewed".to_string(), serde_json::json!(true));

        let flat = metadata.flatten();
        assert_eq!(flat["source"], MetadataValue::from("admission_summary.txt"));
        assert_eq!(flat["document_type"], MetadataValue::from("txt"));
        assert_eq!(flat["chunk_index"], MetadataValue::Integer(2));
        assert_eq!(flat["start_char"], MetadataValue::Integer(10));
        assert_eq!(flat["end_char"], MetadataValue::Integer(90));
        assert_eq!(flat["patient_id"], MetadataValue::from("patient-7"));
        assert_eq!(flat["tags"], MetadataValue::from(r#"["intake","adult"]"#));
        assert_eq!(flat["reviewed"], MetadataValue::Bool(true));
        assert!(!flat.contains_key("fiscal_year"));
    }

    #[test]
    fn extra_keys_never_overwrite_pipeline_keys() {
        let mut metadata = ChunkMetadata {
            source: "real.txt".to_string(),
            ..ChunkMetadata::default()
        };
        metadata
            .extra
            .insert("source".to_string(), serde_json::json!("spoofed.txt"));

        let flat = metadata.flatten();
        assert_eq!(flat["source"], MetadataValue::from("real.txt"));
        assert_eq!(flat["extra_source"], MetadataValue::from("spoofed.txt"));
    }

    #[test]
    fn report_type_names_are_normalized() {
        assert_eq!(ReportType::MedicationReview.display_name(), "Medication Review");
        assert_eq!(ReportType::FullSummary.display_name(), "Full Summary");
        assert_eq!(
            "discharge summary".parse::<ReportType>().ok(),
            Some(ReportType::DischargeSummary)
        );
        assert_eq!(
            "progress-summary".parse::<ReportType>().ok(),
            Some(ReportType::ProgressSummary)
        );
        assert!("weekly_digest".parse::<ReportType>().is_err());
    }

    #[test]
    fn metadata_values_round_trip_through_json() {
        let mut flat = FlatMetadata::new();
        flat.insert("count".to_string(), MetadataValue::Integer(3));
        flat.insert("ratio".to_string(), MetadataValue::Float(0.25));
        flat.insert("name".to_string(), MetadataValue::from("a.txt"));
        let encoded = serde_json::to_string(&flat).expect("serialize");
        let decoded: FlatMetadata = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, flat);
    }
}
