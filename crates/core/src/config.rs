use crate::chunking::ChunkingConfig;
use crate::error::ConfigError;
use crate::generation::GenerationConfig;
use crate::models::IngestionOptions;
use crate::redaction::ScrubberProfile;
use crate::retriever::RetrievalConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_COLLECTION: &str = "clinical_docs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    #[default]
    Local,
    Qdrant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub backend: IndexBackend,
    /// In-memory only when unset.
    pub persist_dir: Option<PathBuf>,
    pub collection: String,
    pub qdrant_url: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Local,
            persist_dir: Some(PathBuf::from("./vector_db")),
            collection: DEFAULT_COLLECTION.to_string(),
            qdrant_url: "http://localhost:6333".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionSettings {
    pub enabled: bool,
    pub profile: ScrubberProfile,
    pub score_threshold: f32,
    /// Presidio analyzer base URL; local patterns are used when unset.
    pub presidio_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RedactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            profile: ScrubberProfile::Default,
            score_threshold: 0.5,
            presidio_url: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceSettings {
    pub use_mock: bool,
    pub mock_data_dir: PathBuf,
    pub share_dir: Option<PathBuf>,
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            use_mock: true,
            mock_data_dir: PathBuf::from("./mock_data"),
            share_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chunking: IngestionOptions,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub index: IndexSettings,
    pub redaction: RedactionSettings,
    pub data_source: DataSourceSettings,
}

impl Settings {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str::<Self>(&raw)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(error) => return Err(error.into()),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let encoded = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, encoded)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ChunkingConfig::from(self.chunking.clone())
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        let threshold = self.retrieval.relevance_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "relevance_threshold {threshold} is outside [0, 1]"
            )));
        }
        let score = self.redaction.score_threshold;
        if !(0.0..=1.0).contains(&score) {
            return Err(ConfigError::Invalid(format!(
                "redaction score_threshold {score} is outside [0, 1]"
            )));
        }
        if self.index.collection.trim().is_empty() {
            return Err(ConfigError::Invalid("collection name is empty".to_string()));
        }
        Ok(())
    }

    /// Flips the mock/real switch and writes the file back.
    pub fn set_use_mock(path: &Path, use_mock: bool) -> Result<Self, ConfigError> {
        let mut settings = Self::load(path)?;
        settings.data_source.use_mock = use_mock;
        settings.save(path)?;
        info!(use_mock, "data source switched");
        Ok(settings)
    }

    /// Root of the document source currently selected.
    pub fn active_root(&self) -> Result<&Path, ConfigError> {
        if self.data_source.use_mock {
            return Ok(&self.data_source.mock_data_dir);
        }
        self.data_source
            .share_dir
            .as_deref()
            .ok_or_else(|| {
                ConfigError::Invalid("share_dir is required when use_mock is false".to_string())
            })
    }
}
