use crate::config::RagConfig;

/// Page-number markers some PDF extractors leave behind.
const PAGE_MARKERS: [&str; 2] = ["Page |", "| Page"];

/// Boundary preference for the splitter: paragraph, line, sentence, word.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone, Copy)]
pub struct SplitConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Characters carried over from the tail of the previous chunk.
    pub chunk_overlap: usize,
}

impl From<&RagConfig> for SplitConfig {
    fn from(config: &RagConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

/// Collapses whitespace runs to single spaces, strips extraction
/// artifacts (page-number markers, NUL bytes) and trims. A page whose
/// text comes back empty from here is dropped before chunking.
pub fn clean_page_text(text: &str) -> String {
    let collapsed = text
        .replace('\u{0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut scrubbed = collapsed;
    for marker in PAGE_MARKERS {
        scrubbed = scrubbed.replace(marker, " ");
    }

    scrubbed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits text into chunks of at most `chunk_size` characters, breaking
/// preferentially at paragraph, then line, then sentence, then word
/// boundaries, with a raw character window as the last resort. Overlap
/// between consecutive chunks is counted in characters, not bytes.
pub fn split_text(text: &str, config: SplitConfig) -> Vec<String> {
    if config.chunk_size == 0 {
        return Vec::new();
    }
    let pieces = split_recursive(text, &SEPARATORS, config.chunk_size);
    pack_with_overlap(pieces, config)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Breaks `text` into pieces no longer than `max_chars`, trying each
/// separator in order before falling back to a character window.
fn split_recursive(text: &str, separators: &[&str], max_chars: usize) -> Vec<String> {
    if char_len(text) <= max_chars {
        return vec![text.to_string()];
    }

    let Some((separator, rest)) = separators.split_first() else {
        return window_pieces(text, max_chars);
    };

    if !text.contains(separator) {
        return split_recursive(text, rest, max_chars);
    }

    let mut pieces = Vec::new();
    for part in text.split_inclusive(separator) {
        if char_len(part) <= max_chars {
            pieces.push(part.to_string());
        } else {
            pieces.extend(split_recursive(part, rest, max_chars));
        }
    }
    pieces
}

fn window_pieces(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|window| window.iter().collect())
        .collect()
}

/// Greedily packs boundary pieces into chunks, seeding each new chunk
/// with the tail of the previous one. The seed is dropped when it would
/// push the chunk past the size limit.
fn pack_with_overlap(pieces: Vec<String>, config: SplitConfig) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        if !current.is_empty() && char_len(&current) + char_len(&piece) > config.chunk_size {
            let seed = overlap_tail(&current, config.chunk_overlap);
            let finished = current.trim().to_string();
            if !finished.is_empty() {
                chunks.push(finished);
            }
            current = if char_len(&seed) + char_len(&piece) > config.chunk_size {
                String::new()
            } else {
                seed
            };
        }
        current.push_str(&piece);
    }

    let last = current.trim().to_string();
    if !last.is_empty() {
        chunks.push(last);
    }

    chunks
}

fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(overlap);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaning_collapses_whitespace_and_strips_artifacts() {
        let input = "Basel  III\t sets\n\ncapital Page | 12 rules\u{0}";
        assert_eq!(
            clean_page_text(input),
            "Basel III sets capital 12 rules"
        );
    }

    #[test]
    fn cleaning_drops_pages_to_empty() {
        assert_eq!(clean_page_text(" \t\n\u{0}"), "");
        assert_eq!(clean_page_text("Page |"), "");
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let config = SplitConfig {
            chunk_size: 100,
            chunk_overlap: 10,
        };
        let chunks = split_text("one small paragraph", config);
        assert_eq!(chunks, vec!["one small paragraph".to_string()]);
    }

    #[test]
    fn chunks_never_exceed_the_size_limit() {
        let config = SplitConfig {
            chunk_size: 40,
            chunk_overlap: 8,
        };
        let text = "First sentence here. Second sentence follows. Third one is longer still. \
                    Fourth closes the paragraph out entirely.";
        let chunks = split_text(text, config);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn paragraph_boundaries_are_preferred() {
        let config = SplitConfig {
            chunk_size: 30,
            chunk_overlap: 0,
        };
        let text = "alpha paragraph one\n\nbeta paragraph two";
        let chunks = split_text(text, config);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "alpha paragraph one");
        assert_eq!(chunks[1], "beta paragraph two");
    }

    #[test]
    fn consecutive_chunks_share_an_overlap_tail() {
        let config = SplitConfig {
            chunk_size: 30,
            chunk_overlap: 12,
        };
        let text = "aaa bbb ccc. ddd eee fff. ggg hhh iii. jjj kkk lll.";
        let chunks = split_text(text, config);
        assert!(chunks.len() >= 2);
        // The second chunk opens with the tail of the first.
        let first_tail: String = chunks[0]
            .chars()
            .skip(chunks[0].chars().count().saturating_sub(4))
            .collect();
        assert!(
            chunks[1].contains(first_tail.trim()),
            "no overlap between {:?} and {:?}",
            chunks[0],
            chunks[1]
        );
    }

    #[test]
    fn unbroken_text_falls_back_to_character_windows() {
        let config = SplitConfig {
            chunk_size: 10,
            chunk_overlap: 0,
        };
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = split_text(text, config);
        assert_eq!(chunks, vec!["abcdefghij", "klmnopqrst", "uvwxyz"]);
    }

    #[test]
    fn overlap_counts_characters_not_bytes() {
        let config = SplitConfig {
            chunk_size: 10,
            chunk_overlap: 4,
        };
        // Multi-byte characters must not split mid-codepoint or panic.
        let text = "äöüß äöüß äöüß äöüß äöüß";
        let chunks = split_text(text, config);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 10);
        }
    }
}
