pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod redaction;
pub mod report;
pub mod retriever;
pub mod source;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{
    chunker_for, normalize_whitespace, Chunker, ChunkingConfig, FixedSizeChunker, ParagraphChunker,
};
pub use config::{DataSourceSettings, IndexBackend, IndexSettings, RedactionSettings, Settings};
pub use embeddings::{Embedder, HashingEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    ConfigError, ExtractionError, GenerationError, IndexError, IngestError, RedactionError,
    RetrievalError, SourceError,
};
pub use extractor::{DocumentExtractor, ExtractedText, TextExtractor};
pub use generation::{GenerationConfig, OllamaClient};
pub use ingest::{
    make_chunk_id, BatchReport, FailedDocument, IngestOutcome, IngestionPipeline,
    SourceIngestReport,
};
pub use models::{
    relevance_score, ChunkMetadata, ChunkingStrategy, DocumentChunk, DocumentType, ExtraMetadata,
    FileEntry, FlatMetadata, GeneratedReport, GenerationMode, IngestionOptions, MetadataValue,
    ProcessedDocument, RagContext, ReportType, RetrievalResult,
};
pub use redaction::{
    EntityReport, EntityType, PatternRecognizer, PiiScrubber, PresidioAnalyzer,
    RecognizedEntity, Redactor, ScrubResult, ScrubberProfile,
};
pub use report::{PromptBuilder, ReportGenerator, ReportState};
pub use retriever::{ClinicalRetriever, RetrievalConfig};
pub use source::{discover_documents, DocumentSource, LocalDocumentSource};
pub use store::{CollectionStats, IndexRecord, MetadataFilter};
pub use stores::{open_index, LocalVectorIndex, QdrantIndex};
pub use traits::{EntityRecognizer, GenerationBackend, GenerationRequest, VectorIndex};
