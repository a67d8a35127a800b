use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// All numeric and path tunables of the pipeline, environment-supplied
/// with documented defaults. Construct via [`RagConfig::from_env`] (or
/// [`Default`] for tests) and validate before use.
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Directory of PDF files to ingest (`RAG_CORPUS_DIR`).
    pub corpus_dir: PathBuf,
    /// Root directory of the persisted vector store (`RAG_STORE_PATH`).
    pub store_path: PathBuf,
    /// Collection name inside the store (`RAG_COLLECTION`).
    pub collection: String,
    /// Target chunk size in characters (`RAG_CHUNK_SIZE`).
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters (`RAG_CHUNK_OVERLAP`).
    pub chunk_overlap: usize,
    /// Chunks embedded and upserted per batch (`RAG_EMBED_BATCH_SIZE`).
    pub embed_batch_size: usize,
    /// Candidates farther than this cosine distance are dropped
    /// (`RAG_SCORE_THRESHOLD`).
    pub score_threshold: f32,
    /// Candidate fetch is `k * overfetch_factor` (`RAG_OVERFETCH_FACTOR`).
    pub overfetch_factor: usize,
    /// Sampling temperature for generation (`RAG_TEMPERATURE`).
    pub temperature: f32,
    /// History turns forwarded to generation (`RAG_MAX_HISTORY_TURNS`).
    pub max_history_turns: usize,
    /// Whether cross-encoder reranking is applied (`RAG_RERANK`).
    pub rerank: bool,
    /// Deadline for one generation call (`RAG_GENERATION_TIMEOUT_SECS`).
    pub generation_timeout_secs: u64,
    /// Optional zip bundle of a prebuilt store (`RAG_INDEX_ARCHIVE_URL`).
    pub index_archive_url: Option<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from("data/documents"),
            store_path: PathBuf::from("vector_store"),
            collection: "regulatory_docs".to_string(),
            chunk_size: 1_500,
            chunk_overlap: 150,
            embed_batch_size: 2_048,
            score_threshold: 1.0,
            overfetch_factor: 3,
            temperature: 0.1,
            max_history_turns: 6,
            rerank: true,
            generation_timeout_secs: 60,
            index_archive_url: None,
        }
    }
}

impl RagConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = env_string("RAG_CORPUS_DIR") {
            config.corpus_dir = PathBuf::from(value);
        }
        if let Some(value) = env_string("RAG_STORE_PATH") {
            config.store_path = PathBuf::from(value);
        }
        if let Some(value) = env_string("RAG_COLLECTION") {
            config.collection = value;
        }
        config.chunk_size = env_parse("RAG_CHUNK_SIZE", config.chunk_size);
        config.chunk_overlap = env_parse("RAG_CHUNK_OVERLAP", config.chunk_overlap);
        config.embed_batch_size = env_parse("RAG_EMBED_BATCH_SIZE", config.embed_batch_size);
        config.score_threshold = env_parse("RAG_SCORE_THRESHOLD", config.score_threshold);
        config.overfetch_factor = env_parse("RAG_OVERFETCH_FACTOR", config.overfetch_factor);
        config.temperature = env_parse("RAG_TEMPERATURE", config.temperature);
        config.max_history_turns = env_parse("RAG_MAX_HISTORY_TURNS", config.max_history_turns);
        config.rerank = env_parse("RAG_RERANK", config.rerank);
        config.generation_timeout_secs =
            env_parse("RAG_GENERATION_TIMEOUT_SECS", config.generation_timeout_secs);
        config.index_archive_url = env_string("RAG_INDEX_ARCHIVE_URL");

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.overfetch_factor < 2 {
            return Err(ConfigError::Invalid(format!(
                "overfetch_factor ({}) must be at least 2",
                self.overfetch_factor
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature ({}) must be within 0.0..=2.0",
                self.temperature
            )));
        }
        if self.generation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "generation_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "collection name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding this collection's manifest and point files.
    pub fn collection_dir(&self) -> PathBuf {
        self.store_path.join(&self.collection)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env_string(key) {
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, raw = %raw, "unparseable env value, using default");
                default
            }
        },
        None => default,
    }
}
