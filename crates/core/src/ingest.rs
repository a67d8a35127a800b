use crate::chunking::{clean_page_text, split_text, SplitConfig};
use crate::config::RagConfig;
use crate::error::IngestError;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::DocumentChunk;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Lists PDF files under `dir`, recursively, in a stable sorted order.
pub fn discover_pdf_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !dir.is_dir() {
        return Err(IngestError::CorpusDirMissing(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub chunks: Vec<DocumentChunk>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Loads, cleans, and chunks every PDF in `dir`. A file that cannot be
/// parsed is skipped, not fatal; a missing directory or a directory
/// without any PDF at all is.
pub fn run_ingestion(dir: &Path, config: &RagConfig) -> Result<Vec<DocumentChunk>, IngestError> {
    Ok(run_ingestion_report(dir, config)?.chunks)
}

pub fn run_ingestion_report(
    dir: &Path,
    config: &RagConfig,
) -> Result<IngestionReport, IngestError> {
    run_ingestion_report_with(&LopdfExtractor, dir, config)
}

pub fn run_ingestion_report_with(
    extractor: &dyn PdfExtractor,
    dir: &Path,
    config: &RagConfig,
) -> Result<IngestionReport, IngestError> {
    let files = discover_pdf_files(dir)?;
    if files.is_empty() {
        return Err(IngestError::EmptyCorpus(dir.to_path_buf()));
    }

    let split = SplitConfig::from(config);
    let mut chunks = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        let source = match source_name(&path) {
            Ok(name) => name,
            Err(error) => {
                skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
                continue;
            }
        };

        match extractor.extract_pages(&path) {
            Ok(pages) => {
                // Chunk indices count per source document so IDs stay
                // stable when other documents come and go.
                let mut next_index = 0u32;
                for page in pages {
                    let cleaned = clean_page_text(&page.text);
                    if cleaned.is_empty() {
                        continue;
                    }
                    for piece in split_text(&cleaned, split) {
                        chunks.push(DocumentChunk {
                            text: piece,
                            source: source.clone(),
                            page: page.number,
                            chunk_index: next_index,
                        });
                        next_index = next_index.saturating_add(1);
                    }
                }
                info!(source = %source, chunk_count = next_index, "ingested pdf");
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable pdf");
                skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(IngestionReport {
        chunks,
        skipped_files,
    })
}

/// Digest over the sorted corpus file list and contents; recorded in
/// the index manifest so a stale index is detectable.
pub fn corpus_checksum(dir: &Path) -> Result<String, IngestError> {
    let mut hasher = Sha256::new();
    for path in discover_pdf_files(dir)? {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(fs::read(&path)?);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn source_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}
