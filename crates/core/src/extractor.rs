use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;
use tracing::warn;

/// Raw text of one page, numbered from 1 as in the document catalog.
#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

/// lopdf-backed extractor. A page whose content stream cannot be
/// decoded is skipped and logged; only a document that fails to open at
/// all is an error (the caller skips that file and records it).
#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            match document.extract_text(&[page_no]) {
                Ok(text) => {
                    if !text.trim().is_empty() {
                        pages.push(PageText {
                            number: page_no,
                            text,
                        });
                    }
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        page = page_no,
                        %error,
                        "skipping unreadable page"
                    );
                }
            }
        }

        Ok(pages)
    }
}
