use crate::config::RagConfig;
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::ingest::{corpus_checksum, run_ingestion_report};
use crate::models::DocumentChunk;
use crate::store::{IndexManifest, LocalVectorStore, VectorIndex};
use chrono::Utc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The collection marker was already present; nothing was touched.
    SkippedExisting,
    /// A fresh index was built with this many chunks.
    Indexed { chunks: usize },
}

/// Ingests the corpus and builds the vector collection. With
/// `reset == false` an existing collection makes this a cheap no-op;
/// with `reset == true` the collection is deleted first: destructive
/// and irreversible, confirmation is the caller's job. Chunk IDs are
/// deterministic, so rebuilding an unchanged corpus produces the same
/// points with no duplicates or orphans.
pub async fn index_corpus<E: Embedder>(
    config: &RagConfig,
    embedder: &E,
    reset: bool,
) -> Result<IndexOutcome, IndexError> {
    if reset {
        LocalVectorStore::destroy(&config.store_path, &config.collection)?;
    } else if LocalVectorStore::collection_exists(&config.store_path, &config.collection) {
        info!(
            collection = %config.collection,
            "collection already indexed, skipping"
        );
        return Ok(IndexOutcome::SkippedExisting);
    }

    let report = run_ingestion_report(&config.corpus_dir, config)?;
    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
    }

    let checksum = corpus_checksum(&config.corpus_dir)?;
    index_chunks(config, embedder, &report.chunks, checksum).await
}

/// Embeds and upserts chunks in fixed-size batches, then commits the
/// manifest. Each batch persists independently, so an aborted run
/// leaves committed batches intact and never a complete-looking index.
pub async fn index_chunks<E: Embedder>(
    config: &RagConfig,
    embedder: &E,
    chunks: &[DocumentChunk],
    corpus_checksum: String,
) -> Result<IndexOutcome, IndexError> {
    let store =
        LocalVectorStore::create(&config.store_path, &config.collection, embedder.dimensions())?;

    let total = chunks.len();
    for (batch_index, batch) in chunks.chunks(config.embed_batch_size).enumerate() {
        let start = batch_index * config.embed_batch_size;
        let end = start + batch.len();

        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = embedder
            .embed_batch(&texts)
            .await
            .map_err(|source| IndexError::EmbedBatch {
                batch: batch_index,
                start,
                end,
                source,
            })?;

        store.upsert_chunks(batch, &embeddings).await?;
        info!(batch = batch_index, stored = end, total, "stored chunk batch");
    }

    store.finalize(&IndexManifest {
        collection: config.collection.clone(),
        dimensions: embedder.dimensions(),
        chunk_count: total,
        corpus_checksum,
        created_at: Utc::now(),
    })?;

    info!(chunks = total, collection = %config.collection, "indexing complete");
    Ok(IndexOutcome::Indexed { chunks: total })
}
