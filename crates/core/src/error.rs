use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("corpus directory not found: {}", .0.display())]
    CorpusDirMissing(PathBuf),

    #[error("no pdf files found in {}", .0.display())]
    EmptyCorpus(PathBuf),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store collection not found at {}; run indexing first", .0.display())]
    Missing(PathBuf),

    #[error("query dimension {got} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("store file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{chunks} chunks but {embeddings} embeddings in upsert batch")]
    CountMismatch { chunks: usize, embeddings: usize },
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("embedding request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("embedding response had {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("embedding api key is not set ({0})")]
    MissingApiKey(&'static str),
}

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rerank api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("rerank response had {got} scores for {expected} candidates")]
    CountMismatch { expected: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("embedding batch {batch} (chunks {start}..{end}) failed: {source}")]
    EmbedBatch {
        batch: usize,
        start: usize,
        end: usize,
        source: EmbedError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embed(#[from] EmbedError),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("chat completion had no choices")]
    EmptyCompletion,

    #[error("generation timed out after {0} seconds")]
    Timeout(u64),

    #[error("generation failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("chat api key is not set ({0})")]
    MissingApiKey(&'static str),
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid archive url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("archive download returned {0}")]
    DownloadFailed(reqwest::StatusCode),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
