use crate::chunking::{chunker_for, Chunker, ChunkingConfig};
use crate::config::Settings;
use crate::error::IngestError;
use crate::extractor::{DocumentExtractor, TextExtractor};
use crate::models::{ChunkMetadata, DocumentChunk, DocumentType, ExtraMetadata, ProcessedDocument};
use crate::redaction::PiiScrubber;
use crate::source::DocumentSource;
use crate::store::IndexRecord;
use crate::traits::VectorIndex;
use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CHUNK_HASH_PREFIX: usize = 16;

/// Result of ingesting one document. `error` is a category plus generic
/// cause and never contains document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub success: bool,
    pub chunks_added: usize,
    pub error: Option<String>,
}

impl IngestOutcome {
    fn added(chunks_added: usize) -> Self {
        Self {
            success: true,
            chunks_added,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            chunks_added: 0,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub successful: usize,
    pub failed: usize,
    pub total_chunks: usize,
    pub failures: Vec<FailedDocument>,
}

impl BatchReport {
    fn record(&mut self, path: &Path, outcome: IngestOutcome) {
        if outcome.success {
            self.successful += 1;
            self.total_chunks += outcome.chunks_added;
        } else {
            self.failed += 1;
            self.failures.push(FailedDocument {
                path: path.to_path_buf(),
                reason: outcome.error.unwrap_or_default(),
            });
        }
    }

    fn merge(&mut self, other: BatchReport) {
        self.successful += other.successful;
        self.failed += other.failed;
        self.total_chunks += other.total_chunks;
        self.failures.extend(other.failures);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceIngestReport {
    pub patients: usize,
    pub documents: usize,
    pub failed: usize,
    pub chunks: usize,
    pub failures: Vec<FailedDocument>,
}

/// Extract, chunk, redact and index. Redaction, when configured, must
/// succeed for every chunk before anything from the document is indexed.
pub struct IngestionPipeline {
    extractor: Box<dyn DocumentExtractor>,
    chunker: Box<dyn Chunker>,
    scrubber: Option<PiiScrubber>,
    index: Arc<dyn VectorIndex>,
}

impl IngestionPipeline {
    pub fn new(
        chunker: Box<dyn Chunker>,
        scrubber: Option<PiiScrubber>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            extractor: Box::new(TextExtractor),
            chunker,
            scrubber,
            index,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self, IngestError> {
        let chunker = chunker_for(
            settings.chunking.strategy,
            ChunkingConfig::from(settings.chunking.clone()),
        )?;
        let scrubber = PiiScrubber::from_settings(&settings.redaction)?;
        Ok(Self::new(chunker, scrubber, index))
    }

    pub fn with_extractor(mut self, extractor: Box<dyn DocumentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn redacts(&self) -> bool {
        self.scrubber.is_some()
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Extracts and chunks one document. Failures are reported in the
    /// returned value rather than raised.
    pub async fn process_file(
        &self,
        path: &Path,
        bytes: Option<Vec<u8>>,
        extra: &ExtraMetadata,
    ) -> ProcessedDocument {
        match self.try_process(path, bytes, extra).await {
            Ok(document) => document,
            Err(error) => {
                warn!(category = error.category(), "document processing failed");
                ProcessedDocument::failed(
                    path.display().to_string(),
                    self.extractor.detect_type(path),
                    error.summary(),
                )
            }
        }
    }

    async fn try_process(
        &self,
        path: &Path,
        bytes: Option<Vec<u8>>,
        extra: &ExtraMetadata,
    ) -> Result<ProcessedDocument, IngestError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
        let document_type = self.extractor.detect_type(path);

        let bytes = match bytes {
            Some(bytes) => bytes,
            None => tokio::fs::read(path).await?,
        };
        let extracted = self.extractor.extract(&bytes, document_type)?;
        drop(bytes);

        let total_chars = extracted.text.chars().count();
        let metadata = ChunkMetadata {
            source: name.to_string(),
            document_type,
            page_count: extracted.unit_count,
            total_chars,
            fiscal_year: extra.fiscal_year.clone(),
            patient_id: extra.patient_id.clone(),
            ingested_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            extra: extra.values.clone(),
            ..ChunkMetadata::default()
        };
        let chunks = self.chunker.chunk(&extracted.text, &metadata);

        info!(
            document_type = %document_type,
            pages = extracted.unit_count,
            chars = total_chars,
            chunks = chunks.len(),
            "processed document"
        );

        Ok(ProcessedDocument {
            source_path: path.display().to_string(),
            document_type,
            total_chars,
            total_pages: extracted.unit_count,
            raw_text: extracted.text,
            chunks,
            metadata,
            success: true,
            error_message: None,
        })
    }

    pub async fn ingest_document(
        &self,
        path: &Path,
        bytes: Option<Vec<u8>>,
        extra: &ExtraMetadata,
    ) -> IngestOutcome {
        let document = self.process_file(path, bytes, extra).await;
        if !document.success {
            return IngestOutcome::failed(document.error_message.unwrap_or_default());
        }
        if document.chunks.is_empty() {
            warn!(document_type = %document.document_type, "document produced no chunks");
            return IngestOutcome::failed("chunking: no chunks generated".to_string());
        }

        match self.index_chunks(path, document.chunks).await {
            Ok(added) => IngestOutcome::added(added),
            Err(error) => {
                warn!(category = error.category(), "document not indexed");
                IngestOutcome::failed(error.summary())
            }
        }
    }

    async fn index_chunks(
        &self,
        path: &Path,
        chunks: Vec<DocumentChunk>,
    ) -> Result<usize, IngestError> {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

        let mut records = Vec::with_capacity(chunks.len());
        let mut redacted = 0usize;
        for chunk in chunks {
            let text = match &self.scrubber {
                Some(scrubber) => {
                    let result = scrubber.scrub(&chunk.text).await?;
                    redacted += result.entities_found;
                    result.scrubbed_text
                }
                None => chunk.text,
            };
            records.push(IndexRecord {
                id: make_chunk_id(stem, chunk.chunk_index, &text),
                text,
                metadata: chunk.metadata.flatten(),
            });
        }

        if self.scrubber.is_some() {
            debug!(chunks = records.len(), entities = redacted, "chunks redacted");
        }
        let added = self.index.upsert_batch(records).await?;
        info!(chunks = added, "indexed document chunks");
        Ok(added)
    }

    /// Ingests one patient's documents. A failing file is recorded and the
    /// batch continues.
    pub async fn ingest_patient_documents(
        &self,
        files: &[PathBuf],
        patient_id: &str,
        fiscal_year: &str,
    ) -> BatchReport {
        let extra = ExtraMetadata::for_patient(patient_id, fiscal_year);
        let mut report = BatchReport::default();
        for path in files {
            let outcome = self.ingest_document(path, None, &extra).await;
            report.record(path, outcome);
        }
        info!(
            successful = report.successful,
            failed = report.failed,
            chunks = report.total_chunks,
            "patient batch complete"
        );
        report
    }

    /// Walks every fiscal year and patient folder of a source. Listing
    /// failures abort; per-document failures are aggregated.
    pub async fn ingest_source(
        &self,
        source: &dyn DocumentSource,
    ) -> Result<SourceIngestReport, IngestError> {
        let mut totals = BatchReport::default();
        let mut patients = 0usize;

        for year in source.list_years()? {
            for patient in source.list_patients(&year)? {
                patients += 1;
                let extra = ExtraMetadata::for_patient(patient.as_str(), year.as_str());
                let mut batch = BatchReport::default();
                for entry in source.patient_files(&year, &patient)? {
                    let outcome = match source.read(&entry) {
                        Ok(bytes) => self.ingest_document(&entry.path, Some(bytes), &extra).await,
                        Err(error) => IngestOutcome::failed(IngestError::from(error).summary()),
                    };
                    batch.record(&entry.path, outcome);
                }
                totals.merge(batch);
            }
        }

        info!(
            patients,
            documents = totals.successful,
            failed = totals.failed,
            chunks = totals.total_chunks,
            "source ingestion complete"
        );
        Ok(SourceIngestReport {
            patients,
            documents: totals.successful,
            failed: totals.failed,
            chunks: totals.total_chunks,
            failures: totals.failures,
        })
    }
}

/// `{stem}_{index}_{hash}` where the hash is a SHA-256 prefix of the stored
/// chunk text. Stable across re-ingestion of unchanged content.
pub fn make_chunk_id(stem: &str, chunk_index: usize, text: &str) -> String {
    let stem: String = stem
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '_' })
        .collect();
    let digest = format!("{:x}", Sha256::digest(text.as_bytes()));
    format!("{stem}_{chunk_index}_{}", &digest[..CHUNK_HASH_PREFIX])
}

pub fn is_supported_path(path: &Path) -> bool {
    DocumentType::from_path(path).is_supported()
}
