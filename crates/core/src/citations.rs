use crate::models::Citation;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// The one grammar for citation markers. Every call site (prompt
/// instructions, extraction, stripping) goes through this module so
/// the contract between generated text and post-processing stays in
/// one place.
const MARKER_PATTERN: &str = r"\[Source\s+(\d+)\]";

fn marker_regex() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(MARKER_PATTERN).ok()).as_ref()
}

fn squeeze_regexes() -> Option<&'static (Regex, Regex)> {
    static SQUEEZE: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    SQUEEZE
        .get_or_init(|| {
            let spaces = Regex::new(r"[ \t]{2,}").ok()?;
            let punct = Regex::new(r"[ \t]+([.,;:!?])").ok()?;
            Some((spaces, punct))
        })
        .as_ref()
}

/// Every marker number in `text`, in order of appearance, duplicates
/// included. Range validation happens during reconciliation.
pub fn extract_marker_indices(text: &str) -> Vec<usize> {
    let Some(regex) = marker_regex() else {
        return Vec::new();
    };
    regex
        .captures_iter(text)
        .filter_map(|capture| capture.get(1)?.as_str().parse::<usize>().ok())
        .collect()
}

/// Removes all markers from the displayed answer and tidies the
/// whitespace and punctuation gaps the removal leaves behind.
pub fn strip_markers(text: &str) -> String {
    let Some(regex) = marker_regex() else {
        return text.to_string();
    };
    let stripped = regex.replace_all(text, "");
    normalize_spacing(&stripped)
}

fn normalize_spacing(text: &str) -> String {
    let Some((spaces, punct)) = squeeze_regexes() else {
        return text.trim().to_string();
    };
    let collapsed = spaces.replace_all(text, " ");
    let tightened = punct.replace_all(&collapsed, "$1");
    tightened.trim().to_string()
}

#[derive(Debug, Clone)]
pub struct ReconciledAnswer {
    pub answer: String,
    pub sources: Vec<String>,
    pub citations: Vec<Citation>,
}

/// Reconciles the generated text against the retrieved evidence set:
/// keeps only in-range marker numbers (a hallucinated `[Source 9]` is
/// silently dropped; showing an unrelated chunk as if cited would be
/// worse than omitting it), maps them to citations deduplicated by
/// `(source, page)`, builds the page-merged source strings, and strips
/// markers from the displayed answer.
pub fn reconcile_citations(raw_answer: &str, citations: &[Citation]) -> ReconciledAnswer {
    let mut used_numbers: Vec<usize> = Vec::new();
    for number in extract_marker_indices(raw_answer) {
        if number >= 1 && number <= citations.len() && !used_numbers.contains(&number) {
            used_numbers.push(number);
        }
    }

    let mut used: Vec<Citation> = Vec::new();
    let mut seen_pages: HashSet<(String, u32)> = HashSet::new();
    for number in used_numbers {
        let citation = &citations[number - 1];
        if seen_pages.insert((citation.source.clone(), citation.page)) {
            used.push(citation.clone());
        }
    }

    ReconciledAnswer {
        answer: strip_markers(raw_answer),
        sources: build_source_list(&used),
        citations: used,
    }
}

/// One display string per source file, pages merged and sorted:
/// `"Doc.pdf (page 5)"` or `"Doc.pdf (pages 3, 7)"`. File order follows
/// first citation appearance.
pub fn build_source_list(citations: &[Citation]) -> Vec<String> {
    let mut pages_by_source: Vec<(&str, Vec<u32>)> = Vec::new();

    for citation in citations {
        let source = citation.source.as_str();
        if let Some(position) = pages_by_source
            .iter()
            .position(|(name, _)| *name == source)
        {
            let pages = &mut pages_by_source[position].1;
            if !pages.contains(&citation.page) {
                pages.push(citation.page);
            }
        } else {
            pages_by_source.push((source, vec![citation.page]));
        }
    }

    pages_by_source
        .into_iter()
        .map(|(source, mut pages)| {
            pages.sort_unstable();
            if pages.len() == 1 {
                format!("{source} (page {})", pages[0])
            } else {
                let listed = pages
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{source} (pages {listed})")
            }
        })
        .collect()
}
