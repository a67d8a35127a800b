use crate::error::RerankError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_RERANK_MODEL: &str = "rerank-v3.5";

/// Second-pass relevance scoring of a small candidate set. Scores are
/// cross-encoder style: higher is more relevant, and they live in a
/// different space than vector-search distances.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// One score per candidate text, in input order.
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, RerankError>;
}

/// Deterministic lexical fallback: the fraction of query terms (length
/// > 2, lowercased) present in the candidate. No model, no network.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermOverlapReranker;

#[async_trait]
impl Reranker for TermOverlapReranker {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, RerankError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|token| token.to_lowercase())
            .filter(|token| token.len() > 2)
            .collect();

        Ok(texts
            .iter()
            .map(|text| {
                if terms.is_empty() {
                    return 0.0;
                }
                let lowered = text.to_lowercase();
                let matched = terms.iter().filter(|term| lowered.contains(*term)).count();
                matched as f32 / terms.len() as f32
            })
            .collect())
    }
}

// ── rerank REST API (Cohere/Jina wire shape) ───────────────────────

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankRow>,
}

#[derive(Deserialize)]
struct RerankRow {
    index: usize,
    relevance_score: f32,
}

/// Cross-encoder scoring over HTTP.
pub struct RemoteReranker {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl RemoteReranker {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }

    /// Reads `RAG_RERANK_ENDPOINT` plus optional `RAG_RERANK_MODEL` and
    /// `RAG_RERANK_API_KEY`; returns `None` when no endpoint is set.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("RAG_RERANK_ENDPOINT")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())?;
        let model = std::env::var("RAG_RERANK_MODEL")
            .unwrap_or_else(|_| DEFAULT_RERANK_MODEL.to_string());
        let api_key = std::env::var("RAG_RERANK_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty());
        Some(Self::new(endpoint, model, api_key))
    }
}

fn scores_from_payload(payload: RerankResponse, expected: usize) -> Result<Vec<f32>, RerankError> {
    let mut scores = vec![0f32; expected];
    let mut seen = 0usize;
    for row in payload.results {
        if row.index >= expected {
            return Err(RerankError::CountMismatch {
                expected,
                got: row.index + 1,
            });
        }
        scores[row.index] = row.relevance_score;
        seen += 1;
    }
    if seen != expected {
        return Err(RerankError::CountMismatch {
            expected,
            got: seen,
        });
    }
    Ok(scores)
}

#[async_trait]
impl Reranker for RemoteReranker {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, RerankError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&RerankRequest {
            model: &self.model,
            query,
            documents: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RerankError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: RerankResponse = response.json().await?;
        scores_from_payload(payload, texts.len())
    }
}

/// Runtime reranker selection: remote cross-encoder when an endpoint is
/// configured, lexical overlap otherwise.
pub enum AnyReranker {
    Remote(RemoteReranker),
    TermOverlap(TermOverlapReranker),
}

impl AnyReranker {
    pub fn from_env() -> Self {
        match RemoteReranker::from_env() {
            Some(remote) => AnyReranker::Remote(remote),
            None => AnyReranker::TermOverlap(TermOverlapReranker),
        }
    }
}

#[async_trait]
impl Reranker for AnyReranker {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, RerankError> {
        match self {
            AnyReranker::Remote(reranker) => reranker.score(query, texts).await,
            AnyReranker::TermOverlap(reranker) => reranker.score(query, texts).await,
        }
    }
}
