use crate::error::StoreError;
use crate::models::DocumentChunk;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

pub const MANIFEST_FILE: &str = "manifest.json";
const POINTS_FILE: &str = "points.json";

/// Read/write seam over the persisted vector collection. Reads are safe
/// from concurrent `ask` calls; writes happen only during indexing.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Upserts chunks keyed by their stable chunk ID; re-upserting the
    /// same corpus is a no-op on the point count.
    async fn upsert_chunks(
        &self,
        chunks: &[DocumentChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError>;

    /// Nearest neighbors by cosine distance, closest first.
    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<(DocumentChunk, f32)>, StoreError>;

    async fn point_count(&self) -> Result<usize, StoreError>;
}

/// Written last by an indexing run; its presence is the
/// "already indexed" marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub collection: String,
    pub dimensions: usize,
    pub chunk_count: usize,
    pub corpus_checksum: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPoint {
    vector: Vec<f32>,
    chunk: DocumentChunk,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PointSet {
    points: BTreeMap<String, StoredPoint>,
}

/// A named collection persisted under `{store_path}/{collection}/` as a
/// manifest plus a chunk-ID-keyed point file, loaded fully into memory.
/// Construct once per process and share; all methods take `&self`.
pub struct LocalVectorStore {
    dir: PathBuf,
    dimensions: usize,
    points: RwLock<PointSet>,
}

impl LocalVectorStore {
    /// Whether the collection has been fully indexed (manifest present).
    pub fn collection_exists(store_path: &Path, collection: &str) -> bool {
        store_path.join(collection).join(MANIFEST_FILE).is_file()
    }

    /// Deletes the collection directory and everything in it.
    pub fn destroy(store_path: &Path, collection: &str) -> Result<(), StoreError> {
        let dir = store_path.join(collection);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
            debug!(dir = %dir.display(), "destroyed collection");
        }
        Ok(())
    }

    /// Starts an empty collection for an indexing run. The manifest is
    /// not written until [`finalize`](Self::finalize), so a crashed run
    /// never masquerades as a complete index.
    pub fn create(
        store_path: &Path,
        collection: &str,
        dimensions: usize,
    ) -> Result<Self, StoreError> {
        let dir = store_path.join(collection);
        fs::create_dir_all(&dir)?;
        let store = Self {
            dir,
            dimensions,
            points: RwLock::new(PointSet::default()),
        };
        store.persist()?;
        Ok(store)
    }

    /// Opens a fully indexed collection; fails with
    /// [`StoreError::Missing`] when the manifest is absent.
    pub fn open(store_path: &Path, collection: &str) -> Result<Self, StoreError> {
        let dir = store_path.join(collection);
        let manifest = Self::read_manifest(store_path, collection)?;

        let points_path = dir.join(POINTS_FILE);
        let points = if points_path.is_file() {
            serde_json::from_slice(&fs::read(&points_path)?)?
        } else {
            PointSet::default()
        };

        debug!(
            dir = %dir.display(),
            points = points.points.len(),
            "opened collection"
        );

        Ok(Self {
            dir,
            dimensions: manifest.dimensions,
            points: RwLock::new(points),
        })
    }

    pub fn read_manifest(store_path: &Path, collection: &str) -> Result<IndexManifest, StoreError> {
        let dir = store_path.join(collection);
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(StoreError::Missing(dir));
        }
        Ok(serde_json::from_slice(&fs::read(&manifest_path)?)?)
    }

    /// Marks the collection complete by writing its manifest.
    pub fn finalize(&self, manifest: &IndexManifest) -> Result<(), StoreError> {
        write_atomic(
            &self.dir.join(MANIFEST_FILE),
            &serde_json::to_vec_pretty(manifest)?,
        )
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn persist(&self) -> Result<(), StoreError> {
        let set = self
            .points
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        write_atomic(&self.dir.join(POINTS_FILE), &serde_json::to_vec(&*set)?)
    }
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    async fn upsert_chunks(
        &self,
        chunks: &[DocumentChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::CountMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }

        {
            let mut set = self
                .points
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (chunk, embedding) in chunks.iter().zip(embeddings) {
                if embedding.len() != self.dimensions {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.dimensions,
                        got: embedding.len(),
                    });
                }
                set.points.insert(
                    chunk.chunk_id(),
                    StoredPoint {
                        vector: embedding.clone(),
                        chunk: chunk.clone(),
                    },
                );
            }
        }

        self.persist()
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<(DocumentChunk, f32)>, StoreError> {
        if query_vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                got: query_vector.len(),
            });
        }

        let set = self
            .points
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut hits: Vec<(DocumentChunk, f32)> = set
            .points
            .values()
            .map(|point| {
                (
                    point.chunk.clone(),
                    cosine_distance(query_vector, &point.vector),
                )
            })
            .collect();

        hits.sort_by(|left, right| left.1.total_cmp(&right.1));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn point_count(&self) -> Result<usize, StoreError> {
        let set = self
            .points
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(set.points.len())
    }
}

/// Cosine distance in [0, 2]: 0 identical direction, 1 orthogonal,
/// 2 opposite. Zero-magnitude vectors land at 1.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        1.0
    } else {
        1.0 - dot / (norm_a * norm_b)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
