use crate::injection::contains_injection_payload;
use crate::models::DocumentChunk;
use tracing::{debug, warn};

/// Drops candidates whose cosine distance exceeds the threshold. When
/// the corpus holds no good match this is what empties the candidate
/// set, which the caller must treat as "insufficient evidence".
pub fn filter_by_distance(
    candidates: Vec<(DocumentChunk, f32)>,
    threshold: f32,
) -> Vec<(DocumentChunk, f32)> {
    let before = candidates.len();
    let kept: Vec<_> = candidates
        .into_iter()
        .filter(|(_, distance)| *distance <= threshold)
        .collect();
    if kept.len() < before {
        debug!(
            dropped = before - kept.len(),
            threshold, "distance filter dropped candidates"
        );
    }
    kept
}

/// Drops candidates whose raw text matches the injection-payload
/// patterns. Untrusted corpus content must never smuggle directives
/// into the generation prompt.
pub fn filter_injected_content(
    candidates: Vec<(DocumentChunk, f32)>,
) -> Vec<(DocumentChunk, f32)> {
    candidates
        .into_iter()
        .filter(|(chunk, _)| {
            let clean = !contains_injection_payload(&chunk.text);
            if !clean {
                warn!(
                    source = %chunk.source,
                    page = chunk.page,
                    "dropped chunk carrying injection payload"
                );
            }
            clean
        })
        .collect()
}
