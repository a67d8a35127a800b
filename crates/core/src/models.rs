use serde::{Deserialize, Serialize};

/// A bounded span of cleaned document text, the unit of embedding and
/// retrieval. Identity is `(source, page, chunk_index)`; `chunk_index`
/// counts monotonically from 0 within one source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub source: String,
    pub page: u32,
    pub chunk_index: u32,
}

impl DocumentChunk {
    /// Stable store key. Re-ingesting an unchanged corpus produces the
    /// same IDs in the same order, which is what makes indexing upserts
    /// idempotent.
    pub fn chunk_id(&self) -> String {
        format!("{}:{}:{}", self.source, self.page, self.chunk_index)
    }
}

/// Relevance of a retrieved chunk. The two regimes live in different
/// score spaces and must never be compared against each other, so they
/// are separate variants rather than a bare float.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Relevance {
    /// Cosine distance from vector search; lower is closer.
    Distance(f32),
    /// Cross-encoder score from reranking; higher is more relevant.
    CrossEncoder(f32),
}

impl Relevance {
    /// The underlying value, for display and citation bookkeeping only.
    pub fn raw(&self) -> f32 {
        match self {
            Relevance::Distance(value) | Relevance::CrossEncoder(value) => *value,
        }
    }
}

/// One element of a retrieval result. Transient, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk: DocumentChunk,
    pub relevance: Relevance,
}

/// Display/accounting record for one numbered context block. The number
/// is implicit: position + 1 in the list handed to the generation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub page: u32,
    pub score: f32,
}

/// What `ask` hands back to the presentation layer. `sources` entries
/// look like `"Doc.pdf (page 5)"` or `"Doc.pdf (pages 3, 7)"`;
/// `citations` is the subset actually referenced by the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<String>,
    pub citations: Vec<Citation>,
    pub num_sources: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One turn of conversation, also the wire shape for the chat API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_source_page_index() {
        let chunk = DocumentChunk {
            text: "capital buffers".to_string(),
            source: "BaselIII.pdf".to_string(),
            page: 5,
            chunk_index: 2,
        };
        assert_eq!(chunk.chunk_id(), "BaselIII.pdf:5:2");
    }

    #[test]
    fn chat_roles_serialize_lowercase() {
        let turn = ChatTurn::assistant("ok");
        let json = serde_json::to_string(&turn).expect("serializable");
        assert!(json.contains("\"role\":\"assistant\""));
    }
}
