//! Lightweight text features shared by the scorer, planner and injector.
//!
//! Everything here is deterministic and allocation-light; no external model
//! calls are involved.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

/// Words ignored for term extraction, title stripping and entity cleanup.
const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "but", "by", "can", "could", "did", "do", "does", "each", "for", "from", "has",
    "have", "how", "if", "in", "into", "is", "it", "its", "just", "like", "many", "more", "most",
    "much", "not", "of", "on", "only", "or", "other", "our", "over", "should", "so", "some",
    "such", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "those", "to", "use", "using", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "why", "will", "with", "would", "you", "your",
];

/// Shortest token that counts as a content term.
pub(crate) const MIN_TERM_LEN: usize = 4;

pub(crate) fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word.to_lowercase().as_str())
}

/// Alphanumeric runs of `text`, in order.
pub(crate) fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

/// Content terms ranked by frequency (desc), ties alphabetical, at most `n`.
pub(crate) fn ranked_terms(text: &str, n: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in words(text) {
        let lower = word.to_lowercase();
        if lower.chars().count() >= MIN_TERM_LEN && !is_stop_word(&lower) {
            *counts.entry(lower).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(term, _)| term).collect()
}

/// The top `n` content terms as an order-insensitive set.
pub(crate) fn top_terms(text: &str, n: usize) -> BTreeSet<String> {
    ranked_terms(text, n).into_iter().collect()
}

/// Capitalized phrases, a cheap proper-noun heuristic.
///
/// Leading stop words are dropped so sentence-initial "The" or "How" do not
/// become entities of their own.
pub(crate) fn entities(text: &str) -> BTreeSet<String> {
    static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b[A-Z][A-Za-z0-9]*(?:[ \t]+[A-Z][A-Za-z0-9]*)*").expect("valid regex")
    });

    ENTITY_RE
        .find_iter(text)
        .filter_map(|m| {
            let parts: Vec<&str> = m
                .as_str()
                .split_whitespace()
                .skip_while(|w| is_stop_word(w))
                .collect();
            let phrase = parts.join(" ");
            (phrase.chars().count() >= 2).then_some(phrase)
        })
        .collect()
}

/// Drop markup, keeping text nodes separated by spaces.
pub(crate) fn strip_tags(html: &str) -> String {
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

    let text = TAG_RE.replace_all(html, " ");
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Split plain text on `.`, `!` and `?`, discarding empty fragments.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Structural size of a text, used for depth matching.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct DepthFeatures {
    pub words: usize,
    pub headings: usize,
    pub list_items: usize,
}

impl DepthFeatures {
    /// Single comparable depth figure.
    pub fn measure(&self) -> f64 {
        self.words as f64 / 150.0 + 3.0 * self.headings as f64 + 0.5 * self.list_items as f64
    }
}

/// Count words, headings and list items in HTML or Markdown text.
pub(crate) fn depth_features(text: &str) -> DepthFeatures {
    static HTML_HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)<h[1-6][\s>]").expect("valid regex"));
    static MD_HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+\S").expect("valid regex"));
    static HTML_LI_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)<li[\s>]").expect("valid regex"));
    static MD_LI_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*+]|\d+\.)\s+\S").expect("valid regex"));

    DepthFeatures {
        words: words(&strip_tags(text)).count(),
        headings: HTML_HEADING_RE.find_iter(text).count() + MD_HEADING_RE.find_iter(text).count(),
        list_items: HTML_LI_RE.find_iter(text).count() + MD_LI_RE.find_iter(text).count(),
    }
}
