use crate::config::RagConfig;
use crate::error::BootstrapError;
use crate::store::LocalVectorStore;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};
use url::Url;

/// Downloads and extracts a prebuilt index bundle when the collection
/// is absent and `RAG_INDEX_ARCHIVE_URL` is set. A bootstrap
/// convenience only; retrieval never calls this. Returns whether the
/// collection exists afterwards.
pub async fn fetch_remote_index(config: &RagConfig) -> Result<bool, BootstrapError> {
    if LocalVectorStore::collection_exists(&config.store_path, &config.collection) {
        return Ok(true);
    }

    let Some(archive_url) = &config.index_archive_url else {
        warn!("no index archive url configured, nothing to fetch");
        return Ok(false);
    };
    let parsed = Url::parse(archive_url)?;

    info!(url = %parsed, "fetching prebuilt index archive");
    let response = reqwest::get(parsed).await?;
    if !response.status().is_success() {
        return Err(BootstrapError::DownloadFailed(response.status()));
    }

    let bytes = response.bytes().await?;
    let extracted = extract_archive(&bytes, &config.store_path)?;
    info!(
        extracted,
        target = %config.store_path.display(),
        "extracted index archive"
    );

    Ok(LocalVectorStore::collection_exists(
        &config.store_path,
        &config.collection,
    ))
}

/// Unpacks a zip bundle into `target`, refusing entries that would
/// escape it.
fn extract_archive(bytes: &[u8], target: &Path) -> Result<usize, BootstrapError> {
    let reader = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader)?;
    fs::create_dir_all(target)?;

    let mut extracted = 0usize;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if name.contains("..") || name.starts_with('/') {
            warn!(entry = %name, "skipping archive entry outside the target");
            continue;
        }

        let out_path = target.join(&name);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            fs::write(&out_path, &buffer)?;
            extracted += 1;
        }
    }

    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in entries {
            let options =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            writer.start_file(*name, options).expect("entry started");
            writer.write_all(content).expect("entry written");
        }
        writer.finish().expect("archive finished").into_inner()
    }

    #[test]
    fn archive_entries_extract_under_the_target() {
        let dir = tempdir().expect("tempdir");
        let bytes = build_zip(&[
            ("regulatory_docs/manifest.json", b"{}".as_slice()),
            ("regulatory_docs/points.json", b"{\"points\":{}}".as_slice()),
        ]);

        let extracted = extract_archive(&bytes, dir.path()).expect("extracted");
        assert_eq!(extracted, 2);
        assert!(dir.path().join("regulatory_docs/manifest.json").is_file());
    }

    #[test]
    fn traversal_entries_are_refused() {
        let dir = tempdir().expect("tempdir");
        let bytes = build_zip(&[("../evil.json", b"{}".as_slice())]);

        let extracted = extract_archive(&bytes, dir.path()).expect("extracted");
        assert_eq!(extracted, 0);
        assert!(!dir.path().join("../evil.json").is_file());
    }
}
