use crate::error::RetrievalError;
use crate::models::{keys, RagContext, RetrievalResult};
use crate::store::MetadataFilter;
use crate::traits::VectorIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub n_results: usize,
    pub relevance_threshold: f64,
    pub max_context_chars: usize,
    /// Prefix each context chunk with a `[Source: ...]` header.
    pub include_metadata: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_results: 5,
            relevance_threshold: 0.3,
            max_context_chars: 4_000,
            include_metadata: true,
        }
    }
}

pub fn source_header(source: &str) -> String {
    format!("[Source: {source}]\n")
}

pub struct ClinicalRetriever {
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl ClinicalRetriever {
    pub fn new(index: Arc<dyn VectorIndex>, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Candidates ranked by ascending distance, keeping those whose
    /// relevance reaches the configured threshold.
    pub async fn retrieve(
        &self,
        query: &str,
        n_results: Option<usize>,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }
        let n = n_results.unwrap_or(self.config.n_results);

        let mut results = self.index.query(query, n, filter).await?;
        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        let candidates = results.len();
        results.retain(|result| result.relevance_score() >= self.config.relevance_threshold);

        info!(
            candidates,
            kept = results.len(),
            threshold = self.config.relevance_threshold,
            "retrieved chunks"
        );
        Ok(results)
    }

    pub async fn retrieve_for_patient(
        &self,
        query: &str,
        patient_id: &str,
        n_results: Option<usize>,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let filter = MetadataFilter::eq(keys::PATIENT_ID, patient_id);
        self.retrieve(query, n_results, Some(&filter)).await
    }

    /// Packs results in rank order until the next one would overflow
    /// `max_chars`, then stops. Chunks are never truncated and a smaller
    /// later chunk never jumps ahead of a larger earlier one.
    pub fn build_context(
        &self,
        query: &str,
        results: Vec<RetrievalResult>,
        max_chars: Option<usize>,
    ) -> RagContext {
        let max_chars = max_chars.unwrap_or(self.config.max_context_chars);
        let total_chunks = results.len();

        let mut parts = Vec::new();
        let mut included = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        let mut chars_used = 0;

        for result in results {
            let part = if self.config.include_metadata {
                format!("{}{}", source_header(result.source()), result.text)
            } else {
                result.text.clone()
            };
            let contribution = part.chars().count();
            if chars_used + contribution > max_chars {
                break;
            }

            let source = result.source();
            if !sources.iter().any(|seen| seen == source) {
                sources.push(source.to_string());
            }
            chars_used += contribution;
            parts.push(part);
            included.push(result);
        }

        debug!(
            included = included.len(),
            considered = total_chunks,
            chars_used,
            "context assembled"
        );

        RagContext {
            query: query.to_string(),
            retrieved_chunks: included,
            total_chunks,
            context_text: parts.join(CONTEXT_SEPARATOR),
            sources,
            chars_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlatMetadata, MetadataValue};
    use crate::stores::LocalVectorIndex;
    use crate::store::IndexRecord;

    fn result(source: &str, text: &str, distance: f64) -> RetrievalResult {
        let mut metadata = FlatMetadata::new();
        metadata.insert(keys::SOURCE.to_string(), MetadataValue::from(source));
        RetrievalResult {
            text: text.to_string(),
            metadata,
            distance,
            doc_id: format!("{source}_{distance}"),
        }
    }

    fn retriever(config: RetrievalConfig) -> ClinicalRetriever {
        ClinicalRetriever::new(Arc::new(LocalVectorIndex::in_memory("test")), config)
    }

    #[test]
    fn packing_stops_at_the_first_overflow() {
        let retriever = retriever(RetrievalConfig {
            include_metadata: false,
            ..RetrievalConfig::default()
        });
        let results = vec![
            result("a.txt", &"a".repeat(60), 0.1),
            result("b.txt", &"b".repeat(50), 0.2),
            result("c.txt", &"c".repeat(10), 0.3),
        ];

        let context = retriever.build_context("q", results, Some(100));
        assert_eq!(context.retrieved_chunks.len(), 1);
        assert_eq!(context.total_chunks, 3);
        assert_eq!(context.chars_used, 60);
        assert_eq!(context.sources, vec!["a.txt"]);
        assert_eq!(context.context_text, "a".repeat(60));
    }

    #[test]
    fn headers_count_against_the_budget() {
        let retriever = retriever(RetrievalConfig::default());
        let header_len = source_header("a.txt").chars().count();
        let results = vec![
            result("a.txt", "first chunk", 0.1),
            result("a.txt", "second chunk", 0.2),
            result("b.txt", "third chunk", 0.3),
        ];

        let budget = 2 * header_len + "first chunk".len() + "second chunk".len();
        let context = retriever.build_context("q", results, Some(budget));
        assert_eq!(context.retrieved_chunks.len(), 2);
        assert_eq!(context.sources, vec!["a.txt"]);
        assert_eq!(
            context.context_text,
            "[Source: a.txt]\nfirst chunk\n\n---\n\n[Source: a.txt]\nsecond chunk"
        );
        assert!(context.context_text.chars().count() <= budget + CONTEXT_SEPARATOR.len());
    }

    #[test]
    fn context_never_exceeds_budget_plus_separators() {
        let retriever = retriever(RetrievalConfig::default());
        for budget in [0, 10, 40, 75, 200, 1_000] {
            let results = (0..8)
                .map(|index| {
                    result(
                        &format!("note_{index}.txt"),
                        &"x".repeat(index * 7 + 3),
                        index as f64,
                    )
                })
                .collect::<Vec<_>>();
            let context = retriever.build_context("q", results, Some(budget));
            let separators =
                context.retrieved_chunks.len().saturating_sub(1) * CONTEXT_SEPARATOR.len();
            assert!(context.context_text.chars().count() <= budget + separators);
            assert!(context.chars_used <= budget);
        }
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let retriever = retriever(RetrievalConfig::default());
        assert!(matches!(
            retriever.retrieve("  ", None, None).await,
            Err(RetrievalError::EmptyQuery)
        ));
    }

    #[tokio::test]
    async fn threshold_and_patient_filter_apply() -> Result<(), Box<dyn std::error::Error>> {
        let index = Arc::new(LocalVectorIndex::in_memory("test"));
        for (id, patient) in [("one", "p1"), ("two", "p2")] {
            let mut metadata = FlatMetadata::new();
            metadata.insert(keys::PATIENT_ID.to_string(), MetadataValue::from(patient));
            metadata.insert(keys::SOURCE.to_string(), MetadataValue::from(format!("{id}.txt")));
            index
                .upsert(IndexRecord {
                    id: id.to_string(),
                    text: "sertraline 50 mg daily".to_string(),
                    metadata,
                })
                .await?;
        }

        let lenient = ClinicalRetriever::new(
            index.clone(),
            RetrievalConfig {
                relevance_threshold: 0.0,
                ..RetrievalConfig::default()
            },
        );
        let hits = lenient.retrieve_for_patient("sertraline 50 mg daily", "p2", None).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source(), "two.txt");
        assert_eq!(hits[0].relevance_score(), 1.0);

        let strict = ClinicalRetriever::new(
            index,
            RetrievalConfig {
                relevance_threshold: 0.99,
                ..RetrievalConfig::default()
            },
        );
        assert!(strict.retrieve("unrelated words entirely", None, None).await?.is_empty());
        Ok(())
    }
}
