//! Relevance scoring between an article and a candidate link target.
//!
//! Four sub-scores on a 0–100 scale are blended with fixed weights:
//! semantic term overlap, entity alignment, anchor quality and depth match.
//! All functions are total: empty input scores 0, never NaN.

use std::collections::HashSet;

use serde::Serialize;

use crate::text;

pub const SEMANTIC_WEIGHT: f64 = 0.35;
pub const ENTITY_WEIGHT: f64 = 0.30;
pub const ANCHOR_WEIGHT: f64 = 0.20;
pub const DEPTH_WEIGHT: f64 = 0.15;

/// Number of most frequent terms compared for semantic similarity.
const TOP_TERMS: usize = 25;

/// Ideal anchor length band, in words.
const IDEAL_ANCHOR_WORDS: (usize, usize) = (2, 5);

/// Connective phrases that read naturally around an inline link.
const CONNECTIVE_PATTERNS: &[&str] = &[
    "learn more about",
    "read more about",
    "complements our guide on",
    "our guide on",
    "our guide to",
    "see our",
    "check out our",
    "a closer look at",
    "in our article on",
    "for a deeper dive",
    "everything you need to know about",
    "step-by-step guide",
];

/// Component and composite relevance, each in 0–100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RelevanceScore {
    pub semantic_similarity: f64,
    pub entity_alignment: f64,
    pub anchor_quality: f64,
    pub depth_match: f64,
    pub composite: f64,
}

impl RelevanceScore {
    fn from_components(semantic: f64, entity: f64, anchor: f64, depth: f64) -> Self {
        let composite = SEMANTIC_WEIGHT * semantic
            + ENTITY_WEIGHT * entity
            + ANCHOR_WEIGHT * anchor
            + DEPTH_WEIGHT * depth;
        Self {
            semantic_similarity: semantic,
            entity_alignment: entity,
            anchor_quality: anchor,
            depth_match: depth,
            composite: clamp_score(composite),
        }
    }
}

/// Score `target_text` as a link target for `source_text` via `anchor_text`.
pub fn score(source_text: &str, target_text: &str, anchor_text: &str) -> RelevanceScore {
    RelevanceScore::from_components(
        semantic_similarity(source_text, target_text),
        entity_alignment(source_text, target_text),
        anchor_quality(anchor_text),
        depth_match(source_text, target_text),
    )
}

/// Title-boosted variant: the target title is weighted into the target's
/// terms and entities. Depth is still measured on the body alone.
pub fn score_with_title(
    source_text: &str,
    target_title: &str,
    target_text: &str,
    anchor_text: &str,
) -> RelevanceScore {
    let boosted = format!("{target_title}\n{target_title}\n{target_text}");
    RelevanceScore::from_components(
        semantic_similarity(source_text, &boosted),
        entity_alignment(source_text, &boosted),
        anchor_quality(anchor_text),
        depth_match(source_text, target_text),
    )
}

/// Jaccard overlap of the two texts' top terms, 0–100.
pub fn semantic_similarity(a: &str, b: &str) -> f64 {
    let terms_a = text::top_terms(a, TOP_TERMS);
    let terms_b = text::top_terms(b, TOP_TERMS);
    let shared = terms_a.intersection(&terms_b).count();
    let union = terms_a.union(&terms_b).count().max(1);
    clamp_score(shared as f64 / union as f64 * 100.0)
}

/// Shared capitalized entities relative to the larger entity set, 0–100.
pub fn entity_alignment(a: &str, b: &str) -> f64 {
    let entities_a = text::entities(a);
    let entities_b = text::entities(b);
    let denom = entities_a.len().max(entities_b.len());
    if denom == 0 {
        return 0.0;
    }
    let shared = entities_a.intersection(&entities_b).count();
    clamp_score(shared as f64 / denom as f64 * 100.0)
}

/// How natural and specific an anchor reads, 0–100.
///
/// Blends length-band fit (50%), connective pattern match (30%) and the
/// absence of repeated words (20%).
pub fn anchor_quality(anchor: &str) -> f64 {
    let words: Vec<String> = text::words(anchor).map(str::to_lowercase).collect();
    if words.is_empty() {
        return 0.0;
    }

    let n = words.len();
    let (lo, hi) = IDEAL_ANCHOR_WORDS;
    let length = if (lo..=hi).contains(&n) {
        100.0
    } else if n < lo {
        100.0 * n as f64 / lo as f64
    } else {
        (100.0 - 20.0 * (n - hi) as f64).max(0.0)
    };

    let normalized = anchor
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let pattern = if CONNECTIVE_PATTERNS.iter().any(|p| normalized.contains(p)) {
        100.0
    } else {
        0.0
    };

    let unique: HashSet<&String> = words.iter().collect();
    let repeated_density = (n - unique.len()) as f64 / n as f64;
    let variety = 100.0 - repeated_density * 100.0;

    clamp_score(0.5 * length + 0.3 * pattern + 0.2 * variety)
}

/// Similarity of structural depth, 0–100, dropping 10 points per unit of
/// depth difference.
pub fn depth_match(a: &str, b: &str) -> f64 {
    let fa = text::depth_features(a);
    let fb = text::depth_features(b);
    if fa.words == 0 || fb.words == 0 {
        return 0.0;
    }
    clamp_score(100.0 - 10.0 * (fa.measure() - fb.measure()).abs())
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
