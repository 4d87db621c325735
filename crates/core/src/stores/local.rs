use crate::embeddings::{squared_euclidean, Embedder, HashingEmbedder};
use crate::error::IndexError;
use crate::models::{FlatMetadata, RetrievalResult};
use crate::store::{CollectionStats, IndexRecord, MetadataFilter};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    text: String,
    metadata: FlatMetadata,
    embedding: Vec<f32>,
}

/// Embedded vector index kept in memory. When opened on a directory the
/// collection is loaded from `<dir>/<collection>.json` and rewritten after
/// every mutation.
pub struct LocalVectorIndex {
    collection: String,
    persist_path: Option<PathBuf>,
    embedder: Box<dyn Embedder>,
    entries: RwLock<BTreeMap<String, StoredEntry>>,
}

impl LocalVectorIndex {
    pub fn in_memory(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            persist_path: None,
            embedder: Box::new(HashingEmbedder::default()),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn open(dir: &Path, collection: impl Into<String>) -> Result<Self, IndexError> {
        let collection = collection.into();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{collection}.json"));

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(error.into()),
        };
        info!(collection = %collection, records = entries.len(), "opened local index");

        Ok(Self {
            collection,
            persist_path: Some(path),
            embedder: Box::new(HashingEmbedder::default()),
            entries: RwLock::new(entries),
        })
    }

    pub fn with_embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub async fn stats(&self) -> CollectionStats {
        CollectionStats {
            name: self.collection.clone(),
            count: self.entries.read().await.len(),
            persist_dir: self
                .persist_path
                .as_ref()
                .and_then(|path| path.parent().map(Path::to_path_buf)),
        }
    }

    async fn persist(&self, entries: &BTreeMap<String, StoredEntry>) -> Result<(), IndexError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let encoded = serde_json::to_vec(entries)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, encoded).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }

    fn entry_for(&self, record: IndexRecord) -> (String, StoredEntry) {
        let embedding = self.embedder.embed(&record.text);
        (
            record.id,
            StoredEntry {
                text: record.text,
                metadata: record.metadata,
                embedding,
            },
        )
    }
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    async fn upsert(&self, record: IndexRecord) -> Result<(), IndexError> {
        let (id, entry) = self.entry_for(record);
        let mut entries = self.entries.write().await;
        entries.insert(id, entry);
        self.persist(&entries).await
    }

    async fn upsert_batch(&self, records: Vec<IndexRecord>) -> Result<usize, IndexError> {
        let count = records.len();
        let prepared: Vec<_> = records
            .into_iter()
            .map(|record| self.entry_for(record))
            .collect();

        let mut entries = self.entries.write().await;
        entries.extend(prepared);
        self.persist(&entries).await?;
        debug!(records = count, "upserted batch");
        Ok(count)
    }

    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        let query_vector = self.embedder.embed(text);
        let entries = self.entries.read().await;

        let mut results: Vec<RetrievalResult> = entries
            .iter()
            .filter(|(_, entry)| filter.map_or(true, |filter| filter.matches(&entry.metadata)))
            .map(|(id, entry)| RetrievalResult {
                text: entry.text.clone(),
                metadata: entry.metadata.clone(),
                distance: squared_euclidean(&query_vector, &entry.embedding),
                doc_id: id.clone(),
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        results.truncate(k);
        Ok(results)
    }

    async fn delete(&self, filter: &MetadataFilter) -> Result<(), IndexError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !filter.matches(&entry.metadata));
        debug!(removed = before - entries.len(), "deleted records");
        self.persist(&entries).await
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.entries.read().await.len())
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let mut entries = self.entries.write().await;
        entries.clear();
        self.persist(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataValue;
    use tempfile::tempdir;

    fn record(id: &str, text: &str, patient: &str) -> IndexRecord {
        let mut metadata = FlatMetadata::new();
        metadata.insert("patient_id".to_string(), MetadataValue::from(patient));
        metadata.insert("source".to_string(), MetadataValue::from(format!("{id}.txt")));
        IndexRecord {
            id: id.to_string(),
            text: text.to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_records_with_the_same_id() -> Result<(), Box<dyn std::error::Error>> {
        let index = LocalVectorIndex::in_memory("clinical_docs");
        index.upsert(record("a", "first version", "p1")).await?;
        index.upsert(record("a", "second version", "p1")).await?;
        assert_eq!(index.count().await?, 1);

        let results = index.query("second version", 5, None).await?;
        assert_eq!(results[0].text, "second version");
        Ok(())
    }

    #[tokio::test]
    async fn query_ranks_by_distance_and_honours_filters() -> Result<(), Box<dyn std::error::Error>>
    {
        let index = LocalVectorIndex::in_memory("clinical_docs");
        index
            .upsert_batch(vec![
                record("a", "insulin dosage adjusted after glucose review", "p1"),
                record("b", "physical therapy session notes", "p1"),
                record("c", "insulin dosage adjusted after glucose review", "p2"),
            ])
            .await?;

        let results = index.query("insulin dosage", 3, None).await?;
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
        // Equal distances fall back to id order.
        assert_eq!(results[0].doc_id, "a");
        assert_eq!(results[1].doc_id, "c");

        let filter = MetadataFilter::eq("patient_id", "p2");
        let filtered = index.query("insulin dosage", 3, Some(&filter)).await?;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].doc_id, "c");
        Ok(())
    }

    #[tokio::test]
    async fn delete_and_clear_remove_records() -> Result<(), Box<dyn std::error::Error>> {
        let index = LocalVectorIndex::in_memory("clinical_docs");
        index
            .upsert_batch(vec![
                record("a", "note one", "p1"),
                record("b", "note two", "p2"),
            ])
            .await?;

        index.delete(&MetadataFilter::eq("source", "a.txt")).await?;
        assert_eq!(index.count().await?, 1);

        index.clear().await?;
        assert_eq!(index.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn persisted_collection_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let index = LocalVectorIndex::open(dir.path(), "clinical_docs").await?;
            index.upsert(record("a", "wound healing well", "p1")).await?;
        }

        let reopened = LocalVectorIndex::open(dir.path(), "clinical_docs").await?;
        assert_eq!(reopened.count().await?, 1);
        assert!(dir.path().join("clinical_docs.json").exists());

        let stats = reopened.stats().await;
        assert_eq!(stats.name, "clinical_docs");
        assert_eq!(stats.count, 1);
        assert_eq!(stats.persist_dir.as_deref(), Some(dir.path()));
        Ok(())
    }
}
