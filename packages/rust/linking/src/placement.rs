//! Sentence-level placement planning for inserted links.
//!
//! Each sentence gets a topical score (does it mention any target topic) and a
//! positional score (how close it sits to the 30% / 60% / 90% marks of the
//! text). Topical match dominates; position spreads links out when topics are
//! absent.

use std::collections::HashSet;

use crate::text;

/// Normalized positions where cross-references read best.
pub const TARGET_FRACTIONS: [f64; 3] = [0.30, 0.60, 0.90];

pub const DEFAULT_MAX_PLACEMENTS: usize = 3;

const TOPICAL_WEIGHT: f64 = 0.7;
const POSITIONAL_WEIGHT: f64 = 0.3;

/// A scored sentence, produced and consumed within one planning call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementCandidate {
    pub sentence_index: usize,
    pub score: f64,
}

/// Pick up to `max_placements` sentence indices of `source_text` for links
/// about `target_topics`, best first.
pub fn plan_placements<T: AsRef<str>>(
    source_text: &str,
    target_topics: &[T],
    max_placements: usize,
) -> Vec<usize> {
    let sentences = text::split_sentences(source_text);
    rank_sentences(&sentences, target_topics, max_placements, &HashSet::new())
}

/// Rank pre-split sentences, skipping indices in `excluded`.
///
/// Positions are normalized against the full sentence count, so excluded
/// sentences still occupy their slot.
pub fn rank_sentences<S: AsRef<str>, T: AsRef<str>>(
    sentences: &[S],
    target_topics: &[T],
    max_placements: usize,
    excluded: &HashSet<usize>,
) -> Vec<usize> {
    let mut seen = HashSet::new();
    score_sentences(sentences, target_topics)
        .into_iter()
        .filter(|c| !excluded.contains(&c.sentence_index))
        .map(|c| c.sentence_index)
        .filter(|idx| seen.insert(*idx))
        .take(max_placements)
        .collect()
}

/// Score every sentence and sort descending; ties keep the earlier sentence.
pub fn score_sentences<S: AsRef<str>, T: AsRef<str>>(
    sentences: &[S],
    target_topics: &[T],
) -> Vec<PlacementCandidate> {
    let total = sentences.len();
    let topics: Vec<String> = target_topics
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let mut candidates: Vec<PlacementCandidate> = sentences
        .iter()
        .enumerate()
        .map(|(idx, sentence)| {
            let lower = sentence.as_ref().to_lowercase();
            let topical = if topics.iter().any(|t| lower.contains(t.as_str())) {
                100.0
            } else {
                0.0
            };
            PlacementCandidate {
                sentence_index: idx,
                score: TOPICAL_WEIGHT * topical + POSITIONAL_WEIGHT * positional_fit(idx, total),
            }
        })
        .collect();

    // Stable: equal scores stay in sentence order.
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates
}

fn positional_fit(index: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let fraction = index as f64 / total as f64;
    let nearest = TARGET_FRACTIONS
        .iter()
        .map(|t| (fraction - t).abs())
        .fold(f64::INFINITY, f64::min);
    100.0 - 100.0 * nearest
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_SENTENCES: &str = "Zero. One. Two. Three. Four. Five. Six. Seven. Eight. Nine.";

    #[test]
    fn empty_source_yields_nothing() {
        assert!(plan_placements("", &["bread"], 3).is_empty());
        assert!(plan_placements(" . ! ? ", &["bread"], 3).is_empty());
    }

    #[test]
    fn positional_only_prefers_canonical_fractions() {
        let picks = plan_placements::<&str>(TEN_SENTENCES, &[], 3);
        // 3/10, 6/10 and 9/10 sit exactly on the target fractions.
        assert_eq!(picks, vec![3, 6, 9]);
    }

    #[test]
    fn topical_match_outranks_position() {
        let text = "Intro text. Flour matters. More words. Even more. Still more. The end.";
        let picks = plan_placements(text, &["FLOUR"], 1);
        assert_eq!(picks, vec![1]);
    }

    #[test]
    fn results_are_bounded_and_distinct() {
        let text = "Only one sentence here";
        let picks = plan_placements(text, &["sentence"], 3);
        assert_eq!(picks, vec![0]);

        let picks = plan_placements(TEN_SENTENCES, &["o"], 3);
        assert!(picks.len() <= 3);
        let unique: HashSet<_> = picks.iter().collect();
        assert_eq!(unique.len(), picks.len());
        assert!(picks.iter().all(|&i| i < 10));
    }

    #[test]
    fn ties_break_toward_earlier_sentences() {
        let sentences = ["a", "b"];
        let ranked = score_sentences(&sentences, &["a", "b"]);
        // 0/2 is 0.30 from a target, 1/2 only 0.10: sentence 1 first.
        assert_eq!(ranked[0].sentence_index, 1);

        // Every sentence matches, so 3, 6 and 9 tie on score.
        let sentences = ["bread"; 10];
        let ranked = score_sentences(&sentences, &["bread"]);
        assert_eq!(ranked[0].score, ranked[2].score);
        let top: Vec<usize> = ranked.iter().take(3).map(|c| c.sentence_index).collect();
        assert_eq!(top, vec![3, 6, 9]);
    }

    #[test]
    fn excluded_sentences_are_skipped() {
        let sentences: Vec<&str> = text::split_sentences(TEN_SENTENCES);
        let excluded: HashSet<usize> = [3, 6].into_iter().collect();
        let picks = rank_sentences::<_, &str>(&sentences, &[], 2, &excluded);
        assert_eq!(picks.first(), Some(&9));
        assert!(!picks.contains(&3));
        assert!(!picks.contains(&6));
    }
}
