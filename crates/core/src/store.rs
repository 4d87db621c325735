use crate::models::{FlatMetadata, MetadataValue};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One chunk as handed to a vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub text: String,
    pub metadata: FlatMetadata,
}

/// Conjunction of equality clauses over flat metadata keys. An empty filter
/// matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    clauses: Vec<(String, MetadataValue)>,
}

impl MetadataFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::default().and(key, value)
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.clauses.push((key.into(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, MetadataValue)] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, metadata: &FlatMetadata) -> bool {
        self.clauses
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub count: usize,
    pub persist_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_requires_every_clause() {
        let mut metadata = FlatMetadata::new();
        metadata.insert("patient_id".to_string(), "p-1".into());
        metadata.insert("fiscal_year".to_string(), "FY 25".into());

        assert!(MetadataFilter::default().matches(&metadata));
        assert!(MetadataFilter::eq("patient_id", "p-1").matches(&metadata));
        assert!(MetadataFilter::eq("patient_id", "p-1")
            .and("fiscal_year", "FY 25")
            .matches(&metadata));
        assert!(!MetadataFilter::eq("patient_id", "p-1")
            .and("fiscal_year", "FY 24")
            .matches(&metadata));
        assert!(!MetadataFilter::eq("source", "a.txt").matches(&metadata));
    }

    #[test]
    fn filter_compares_typed_values() {
        let mut metadata = FlatMetadata::new();
        metadata.insert("chunk_index".to_string(), MetadataValue::Integer(3));
        assert!(MetadataFilter::eq("chunk_index", 3i64).matches(&metadata));
        assert!(!MetadataFilter::eq("chunk_index", "3").matches(&metadata));
    }
}
