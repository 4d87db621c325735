pub mod local;
pub mod qdrant;

pub use local::LocalVectorIndex;
pub use qdrant::QdrantIndex;

use crate::config::{IndexBackend, IndexSettings};
use crate::error::IndexError;
use crate::traits::VectorIndex;
use std::sync::Arc;

/// Opens the index selected by the settings. Qdrant collections are created
/// on first use.
pub async fn open_index(settings: &IndexSettings) -> Result<Arc<dyn VectorIndex>, IndexError> {
    match settings.backend {
        IndexBackend::Local => {
            let index = match &settings.persist_dir {
                Some(dir) => LocalVectorIndex::open(dir, settings.collection.clone()).await?,
                None => LocalVectorIndex::in_memory(settings.collection.clone()),
            };
            Ok(Arc::new(index))
        }
        IndexBackend::Qdrant => {
            let index = QdrantIndex::new(&settings.qdrant_url, settings.collection.clone())?;
            index.ensure_collection().await?;
            Ok(Arc::new(index))
        }
    }
}
