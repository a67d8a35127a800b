use crate::error::EmbedError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_HASH_DIMENSIONS: usize = 256;

const DEFAULT_REMOTE_DIMENSIONS: usize = 1_536;
const DEFAULT_EMBEDDINGS_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const MAX_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let batch = [text.to_string()];
        let mut vectors = self.embed_batch(&batch).await?;
        vectors.pop().ok_or(EmbedError::CountMismatch {
            expected: 1,
            got: 0,
        })
    }
}

/// Deterministic character-trigram embedder: trigrams are FNV-hashed
/// into buckets and the vector L2-normalized. No model, no network:
/// the offline and test path.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    pub dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASH_DIMENSIONS,
        }
    }
}

impl HashEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3.min(chars.len())) {
            let token: String = window.iter().collect();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

// ── OpenAI-style embeddings API ────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

/// REST embedding client with a bounded retry policy: transient
/// failures (429, 5xx, transport) are retried with backoff up to
/// [`MAX_ATTEMPTS`] before the batch is declared failed.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

impl RemoteEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            dimensions,
        }
    }

    /// Reads `OPENAI_API_KEY` plus optional `RAG_EMBEDDINGS_ENDPOINT`
    /// and `RAG_EMBEDDING_MODEL` overrides.
    pub fn from_env() -> Result<Self, EmbedError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(EmbedError::MissingApiKey("OPENAI_API_KEY"))?;

        let endpoint = std::env::var("RAG_EMBEDDINGS_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_EMBEDDINGS_ENDPOINT.to_string());
        let model = std::env::var("RAG_EMBEDDING_MODEL")
            .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string());

        Ok(Self::new(
            endpoint,
            model,
            api_key,
            DEFAULT_REMOTE_DIMENSIONS,
        ))
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbedError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: EmbeddingResponse = response.json().await?;
        vectors_from_payload(payload, texts.len())
    }
}

fn vectors_from_payload(
    payload: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if payload.data.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            got: payload.data.len(),
        });
    }
    Ok(payload.data.into_iter().map(|row| row.embedding).collect())
}

fn is_transient(error: &EmbedError) -> bool {
    match error {
        EmbedError::Http(_) => true,
        EmbedError::Api { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.request_batch(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(error) if is_transient(&error) => {
                    warn!(attempt, %error, "embedding request failed");
                    last = error.to_string();
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                    }
                }
                Err(error) => return Err(error),
            }
        }

        Err(EmbedError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
            last,
        })
    }
}

/// Runtime embedder selection: the remote client when an API key is
/// configured, the deterministic hash embedder otherwise.
pub enum AnyEmbedder {
    Remote(RemoteEmbedder),
    Hash(HashEmbedder),
}

impl AnyEmbedder {
    pub fn from_env() -> Self {
        match RemoteEmbedder::from_env() {
            Ok(remote) => AnyEmbedder::Remote(remote),
            Err(_) => {
                debug!("no embedding api key set, using deterministic hash embedder");
                AnyEmbedder::Hash(HashEmbedder::default())
            }
        }
    }
}

#[async_trait]
impl Embedder for AnyEmbedder {
    fn dimensions(&self) -> usize {
        match self {
            AnyEmbedder::Remote(embedder) => embedder.dimensions(),
            AnyEmbedder::Hash(embedder) => embedder.dimensions(),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        match self {
            AnyEmbedder::Remote(embedder) => embedder.embed_batch(texts).await,
            AnyEmbedder::Hash(embedder) => embedder.embed_batch(texts).await,
        }
    }
}
