use crate::error::{GenerationError, IndexError, RedactionError};
use crate::models::RetrievalResult;
use crate::redaction::RecognizedEntity;
use crate::store::{IndexRecord, MetadataFilter};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces the record stored under `record.id`.
    async fn upsert(&self, record: IndexRecord) -> Result<(), IndexError>;

    async fn upsert_batch(&self, records: Vec<IndexRecord>) -> Result<usize, IndexError> {
        let count = records.len();
        for record in records {
            self.upsert(record).await?;
        }
        Ok(count)
    }

    /// Up to `k` records ranked by ascending distance to `text`.
    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, IndexError>;

    async fn delete(&self, filter: &MetadataFilter) -> Result<(), IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    async fn clear(&self) -> Result<(), IndexError>;
}

#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    /// Detected entities, with byte spans into `text`.
    async fn analyze(&self, text: &str) -> Result<Vec<RecognizedEntity>, RedactionError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}
