use crate::models::{Citation, RankedChunk};
use std::collections::HashSet;

/// Separator between numbered context blocks in the generation prompt.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Builds the numbered context string shown to the generation model and
/// the parallel citation list. Chunks with identical text are counted
/// once, whichever chunk ID they came from; numbering is 1..N in the
/// order given and is the authoritative contract behind `[Source N]`
/// markers.
pub fn format_retrieved_context(results: &[RankedChunk]) -> (String, Vec<Citation>) {
    let mut blocks = Vec::new();
    let mut citations = Vec::new();
    let mut seen_text: HashSet<&str> = HashSet::new();

    for ranked in results {
        let text = ranked.chunk.text.trim();
        if text.is_empty() || !seen_text.insert(text) {
            continue;
        }

        let number = citations.len() + 1;
        blocks.push(format!(
            "[Source {number}: {}, Page {}]\n{text}",
            ranked.chunk.source, ranked.chunk.page
        ));
        citations.push(Citation {
            source: ranked.chunk.source.clone(),
            page: ranked.chunk.page,
            score: ranked.relevance.raw(),
        });
    }

    (blocks.join(CONTEXT_SEPARATOR), citations)
}
