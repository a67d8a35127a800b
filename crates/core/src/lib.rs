pub mod bootstrap;
pub mod chunking;
pub mod citations;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod indexing;
pub mod ingest;
pub mod injection;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod retrieval;
pub mod store;

pub use bootstrap::fetch_remote_index;
pub use chunking::{clean_page_text, split_text, SplitConfig};
pub use citations::{build_source_list, reconcile_citations, ReconciledAnswer};
pub use config::RagConfig;
pub use context::{format_retrieved_context, CONTEXT_SEPARATOR};
pub use embeddings::{AnyEmbedder, Embedder, HashEmbedder, RemoteEmbedder};
pub use error::{
    BootstrapError, ConfigError, EmbedError, GenerationError, IndexError, IngestError,
    RerankError, RetrieveError, StoreError,
};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use generation::{
    ChatModel, OpenAiChatModel, DEGRADED_ANSWER, IDK_FALLBACK, INJECTION_REFUSAL,
};
pub use indexing::{index_chunks, index_corpus, IndexOutcome};
pub use ingest::{
    discover_pdf_files, run_ingestion, run_ingestion_report, IngestionReport, SkippedPdf,
};
pub use injection::{contains_injection_payload, looks_like_prompt_injection};
pub use models::{
    AnswerResult, ChatRole, ChatTurn, Citation, DocumentChunk, RankedChunk, Relevance,
};
pub use pipeline::{RagPipeline, MAX_TOP_K};
pub use rerank::{AnyReranker, RemoteReranker, Reranker, TermOverlapReranker};
pub use store::{IndexManifest, LocalVectorStore, VectorIndex};
