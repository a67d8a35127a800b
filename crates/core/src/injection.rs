use regex::Regex;
use std::sync::OnceLock;

/// Instruction-override phrasings screened out of user questions before
/// any retrieval or generation happens.
const INPUT_PATTERNS: [&str; 11] = [
    r"(?i)ignore (all|any|previous) instructions",
    r"(?i)system prompt",
    r"(?i)developer (message|mode)",
    r"(?i)you are chatgpt",
    r"(?i)reveal.*(prompt|policy|instructions)",
    r"(?i)do not follow",
    r"(?i)\boverride\b",
    r"(?i)forget your",
    r"(?i)new instructions",
    r"(?i)\bdisregard\b",
    r"(?i)\bjailbreak\b",
];

/// Directive smuggling screened out of retrieved corpus text before it
/// reaches the generation prompt. Narrower than the input set: corpus
/// documents legitimately contain words like "override".
const CONTENT_PATTERNS: [&str; 6] = [
    r"(?i)ignore (all |any )?previous instructions",
    r"(?i)developer mode",
    r"(?i)\bjailbreak\b",
    r"(?i)do not follow",
    r"(?i)new instructions",
    r"(?i)system prompt",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
}

fn input_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile(&INPUT_PATTERNS))
}

fn content_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile(&CONTENT_PATTERNS))
}

/// Best-effort heuristic, not a security boundary: the structural
/// defense is the grounding prompt's inert-context rule.
pub fn looks_like_prompt_injection(text: &str) -> bool {
    !text.is_empty() && input_patterns().iter().any(|pattern| pattern.is_match(text))
}

pub fn contains_injection_payload(text: &str) -> bool {
    !text.is_empty()
        && content_patterns()
            .iter()
            .any(|pattern| pattern.is_match(text))
}
