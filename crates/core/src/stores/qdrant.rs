use crate::embeddings::{Embedder, HashingEmbedder};
use crate::error::{http_cause, IndexError};
use crate::models::{FlatMetadata, MetadataValue, RetrievalResult};
use crate::store::{IndexRecord, MetadataFilter};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

const TEXT_FIELD: &str = "text";
const CHUNK_ID_FIELD: &str = "chunk_id";

/// REST adapter for a Qdrant collection using Euclidean distance.
pub struct QdrantIndex {
    endpoint: Url,
    collection: String,
    client: Client,
    embedder: HashingEmbedder,
}

impl QdrantIndex {
    pub fn new(endpoint: &str, collection: impl Into<String>) -> Result<Self, IndexError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Self {
            endpoint,
            collection: collection.into(),
            client: Client::new(),
            embedder: HashingEmbedder::default(),
        })
    }

    fn url(&self, suffix: &str) -> Result<Url, IndexError> {
        Ok(self
            .endpoint
            .join(&format!("collections/{}{}", self.collection, suffix))?)
    }

    /// Creates the collection when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let existing = self
            .client
            .get(self.url("")?)
            .send()
            .await
            .map_err(request_error)?;
        if existing.status().is_success() {
            return Ok(());
        }
        if existing.status().as_u16() != 404 {
            return Err(backend_error(existing.status().to_string()));
        }

        let response = self
            .client
            .put(self.url("")?)
            .json(&json!({
                "vectors": {
                    "size": self.embedder.dimensions(),
                    "distance": "Euclid",
                }
            }))
            .send()
            .await
            .map_err(request_error)?;
        expect_success(response).await.map(|_| ())
    }

    fn point_id(chunk_id: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, record: IndexRecord) -> Result<(), IndexError> {
        self.upsert_batch(vec![record]).await.map(|_| ())
    }

    async fn upsert_batch(&self, records: Vec<IndexRecord>) -> Result<usize, IndexError> {
        if records.is_empty() {
            return Ok(0);
        }

        let points = records
            .iter()
            .map(|record| -> Result<Value, IndexError> {
                let mut payload = serde_json::to_value(&record.metadata)?;
                if let Value::Object(fields) = &mut payload {
                    fields.insert(TEXT_FIELD.to_string(), json!(record.text));
                    fields.insert(CHUNK_ID_FIELD.to_string(), json!(record.id));
                }
                Ok(json!({
                    "id": Self::point_id(&record.id).to_string(),
                    "vector": self.embedder.embed(&record.text),
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        let response = self
            .client
            .put(self.url("/points?wait=true")?)
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(request_error)?;
        expect_success(response).await?;
        Ok(records.len())
    }

    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        let mut body = json!({
            "vector": self.embedder.embed(text),
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter.filter(|filter| !filter.is_empty()) {
            body["filter"] = filter_json(filter);
        }

        let response = self
            .client
            .post(self.url("/points/search")?)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let parsed = expect_success(response).await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| backend_error("missing result".to_string()))?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            // Euclid scores are plain distances; the local index ranks by the square.
            let score = hit
                .pointer("/score")
                .and_then(Value::as_f64)
                .ok_or_else(|| backend_error("missing score".to_string()))?;
            let mut payload = hit
                .pointer("/payload")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let text = payload
                .remove(TEXT_FIELD)
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_default();
            let doc_id = payload
                .remove(CHUNK_ID_FIELD)
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_default();
            let metadata: FlatMetadata = payload
                .into_iter()
                .map(|(key, value)| (key, MetadataValue::from(value)))
                .collect();

            results.push(RetrievalResult {
                text,
                metadata,
                distance: score * score,
                doc_id,
            });
        }

        Ok(results)
    }

    async fn delete(&self, filter: &MetadataFilter) -> Result<(), IndexError> {
        let response = self
            .client
            .post(self.url("/points/delete?wait=true")?)
            .json(&json!({ "filter": filter_json(filter) }))
            .send()
            .await
            .map_err(request_error)?;
        expect_success(response).await.map(|_| ())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let response = self
            .client
            .post(self.url("/points/count")?)
            .json(&json!({ "exact": true }))
            .send()
            .await
            .map_err(request_error)?;
        let parsed = expect_success(response).await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| backend_error("missing count".to_string()))
    }

    async fn clear(&self) -> Result<(), IndexError> {
        self.delete(&MetadataFilter::default()).await
    }
}

fn filter_json(filter: &MetadataFilter) -> Value {
    let must: Vec<Value> = filter
        .clauses()
        .iter()
        .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
        .collect();
    json!({ "must": must })
}

fn request_error(error: reqwest::Error) -> IndexError {
    IndexError::Request(http_cause(&error))
}

fn backend_error(details: String) -> IndexError {
    IndexError::BackendResponse {
        backend: "qdrant".to_string(),
        details,
    }
}

async fn expect_success(response: Response) -> Result<Value, IndexError> {
    if !response.status().is_success() {
        return Err(backend_error(response.status().to_string()));
    }
    response.json().await.map_err(request_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn search_maps_payload_back_to_results() -> Result<(), Box<dyn std::error::Error>> {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/collections/clinical_docs/points/search")
            .match_body(Matcher::PartialJson(json!({
                "limit": 2,
                "filter": { "must": [{ "key": "patient_id", "match": { "value": "p-1" } }] }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "result": [{
                        "id": "2f1c0c57-4a43-5e43-9a0e-000000000000",
                        "score": 1.5,
                        "payload": {
                            "text": "Vitals stable.",
                            "chunk_id": "note_0_abcd",
                            "source": "note.txt",
                            "chunk_index": 0
                        }
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let index = QdrantIndex::new(&server.url(), "clinical_docs")?;
        let filter = MetadataFilter::eq("patient_id", "p-1");
        let results = index.query("vitals", 2, Some(&filter)).await?;

        mock.assert_async().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "Vitals stable.");
        assert_eq!(results[0].doc_id, "note_0_abcd");
        assert_eq!(results[0].source(), "note.txt");
        assert_eq!(results[0].metadata["chunk_index"], MetadataValue::Integer(0));
        assert!(!results[0].metadata.contains_key("text"));
        assert!((results[0].distance - 2.25).abs() < 1e-9);
        Ok(())
    }

    async fn search_against(body: Value) -> Result<Vec<RetrievalResult>, IndexError> {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/collections/clinical_docs/points/search")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;
        let index = QdrantIndex::new(&server.url(), "clinical_docs")?;
        index.query("vitals", 3, None).await
    }

    #[tokio::test]
    async fn hit_without_score_is_a_backend_error() {
        let body = json!({
            "result": [{
                "id": "2f1c0c57-4a43-5e43-9a0e-000000000000",
                "payload": { "text": "Vitals stable.", "chunk_id": "note_0_abcd" }
            }]
        });
        assert!(matches!(
            search_against(body).await,
            Err(IndexError::BackendResponse { .. })
        ));
    }

    #[tokio::test]
    async fn search_body_without_result_is_a_backend_error() {
        assert!(matches!(
            search_against(json!({ "status": "ok" })).await,
            Err(IndexError::BackendResponse { .. })
        ));
    }

    #[tokio::test]
    async fn empty_result_list_is_no_hits() -> Result<(), Box<dyn std::error::Error>> {
        let results = search_against(json!({ "result": [], "status": "ok" })).await?;
        assert!(results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_upsert_surfaces_backend_status() -> Result<(), Box<dyn std::error::Error>> {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock(
                "PUT",
                Matcher::Regex(r"^/collections/clinical_docs/points".to_string()),
            )
            .with_status(503)
            .create_async()
            .await;

        let index = QdrantIndex::new(&server.url(), "clinical_docs")?;
        let error = index
            .upsert(IndexRecord {
                id: "note_0_abcd".to_string(),
                text: "text".to_string(),
                metadata: FlatMetadata::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, IndexError::BackendResponse { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn count_reads_exact_total() -> Result<(), Box<dyn std::error::Error>> {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/collections/clinical_docs/points/count")
            .with_status(200)
            .with_body(r#"{"result":{"count":7},"status":"ok"}"#)
            .create_async()
            .await;

        let index = QdrantIndex::new(&server.url(), "clinical_docs")?;
        assert_eq!(index.count().await?, 7);
        Ok(())
    }

    #[test]
    fn point_ids_are_stable() {
        assert_eq!(
            QdrantIndex::point_id("note_0_abcd"),
            QdrantIndex::point_id("note_0_abcd")
        );
        assert_ne!(
            QdrantIndex::point_id("note_0_abcd"),
            QdrantIndex::point_id("note_1_abcd")
        );
    }
}
