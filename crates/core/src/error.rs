use crate::models::DocumentType;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn raw document bytes into text.
///
/// Never carries document content: the cause is always one of a fixed set of
/// labels chosen at the failure site.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported document type: {0}")]
    Unsupported(DocumentType),

    #[error("{format} extraction failed: {cause}")]
    Malformed {
        format: DocumentType,
        cause: &'static str,
    },

    #[error("{format} document has no readable text")]
    NoText { format: DocumentType },

    #[error("markup pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl ExtractionError {
    pub(crate) fn malformed(format: DocumentType, cause: &'static str) -> Self {
        Self::Malformed { format, cause }
    }
}

#[derive(Debug, Error)]
pub enum RedactionError {
    #[error("invalid recognizer pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid entity recognizer endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("entity recognizer request failed: {0}")]
    Request(&'static str),

    #[error("entity recognizer returned status {0}")]
    Status(u16),

    #[error("entity recognizer response was malformed")]
    MalformedResponse,

    #[error("entity span {start}..{end} does not fit the analysed text")]
    SpanOutOfBounds { start: usize, end: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid index endpoint: {0}")]
    Url(#[from] url::ParseError),

    #[error("index request failed: {0}")]
    Request(&'static str),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("index query failed: {0}")]
    Index(#[from] IndexError),
}

/// Generation backend failures. These are absorbed by the report generator,
/// which falls back to the structured report.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend unreachable at {0}")]
    Unreachable(String),

    #[error("generation request timed out after {0}s")]
    Timeout(u64),

    #[error("generation backend returned status {0}")]
    Status(u16),

    #[error("generation response was not valid json")]
    MalformedResponse,

    #[error("generation backend returned empty content")]
    EmptyContent,

    #[error("generation request failed: {0}")]
    Request(&'static str),

    #[error("invalid generation endpoint: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("document source root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("{0} folder does not exist")]
    NotFound(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("document source io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Everything that can abort the ingestion of a single document.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Redaction(#[from] RedactionError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

impl IngestError {
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::MissingFileName(_) => "read",
            Self::Extraction(_) => "extraction",
            Self::Redaction(_) => "redaction",
            Self::Index(_) => "index",
            Self::Source(_) => "source",
            Self::InvalidChunkConfig(_) => "config",
        }
    }

    /// Category plus a generic cause, safe to show to users and to log.
    pub fn summary(&self) -> String {
        let cause = match self {
            Self::Io(error) => format!("{:?}", error.kind()),
            Self::Extraction(error) => error.to_string(),
            Self::Redaction(error) => redaction_cause(error).to_string(),
            Self::Index(error) => index_cause(error).to_string(),
            Self::Source(SourceError::Io(error)) => format!("{:?}", error.kind()),
            Self::Source(error) => error.to_string(),
            Self::MissingFileName(_) => "missing file name".to_string(),
            Self::InvalidChunkConfig(reason) => reason.clone(),
        };
        format!("{}: {}", self.category(), cause)
    }
}

fn redaction_cause(error: &RedactionError) -> &'static str {
    match error {
        RedactionError::Pattern(_) => "pattern",
        RedactionError::Endpoint(_) => "endpoint",
        RedactionError::Request(kind) => kind,
        RedactionError::Status(_) => "status",
        RedactionError::MalformedResponse => "malformed response",
        RedactionError::SpanOutOfBounds { .. } => "span out of bounds",
    }
}

fn index_cause(error: &IndexError) -> &'static str {
    match error {
        IndexError::Io(_) => "io",
        IndexError::Serialization(_) => "serialization",
        IndexError::Url(_) => "endpoint",
        IndexError::Request(kind) => kind,
        IndexError::BackendResponse { .. } => "backend response",
    }
}

/// Maps a transport error onto a fixed label. reqwest messages can embed
/// URLs and bodies, so they are never surfaced verbatim.
pub(crate) fn http_cause(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else if error.is_decode() {
        "decode"
    } else if error.is_status() {
        "status"
    } else {
        "request"
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_never_contains_document_text() {
        let error = IngestError::Extraction(ExtractionError::malformed(
            DocumentType::Pdf,
            "unreadable pdf structure",
        ));
        assert_eq!(
            error.summary(),
            "extraction: pdf extraction failed: unreadable pdf structure"
        );
    }

    #[test]
    fn io_summary_uses_error_kind() {
        let error = IngestError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "/data/FY 25/Doe_John_001/admission.txt",
        ));
        assert_eq!(error.summary(), "read: NotFound");
    }

    #[test]
    fn redaction_summary_is_generic() {
        let error = IngestError::Redaction(RedactionError::Request("timeout"));
        assert_eq!(error.summary(), "redaction: timeout");
    }
}
