//! Link injection: choose the best targets and rewrite the article body.
//!
//! Candidates are scored with [`crate::relevance`], filtered by the configured
//! relevance floor, ranked, and placed one per sentence through
//! [`crate::placement`]. Link markup is inserted just before a sentence
//! terminator; every other byte of the input is preserved. Distances and
//! reported positions count characters, not bytes.

use std::collections::HashSet;

use tracing::{debug, info, instrument};

use postforge_shared::{LinkCandidate, LinkPlacement, LinkingConfig};

use crate::placement;
use crate::relevance::{self, RelevanceScore};
use crate::text;

/// At most this many anchor variants are scored per candidate.
const MAX_ANCHOR_VARIANTS: usize = 5;

/// Number of target terms used as placement topics.
const TOPIC_TERMS: usize = 5;

/// Tags whose text never receives an inserted link.
const BLOCKING_TAGS: &[&str] = &[
    "a", "h1", "h2", "h3", "h4", "h5", "h6", "script", "style", "iframe", "figcaption", "code",
    "pre",
];

/// Output of one injection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionResult {
    /// The rewritten content.
    pub html: String,
    /// Inserted links in document order.
    pub links_added: Vec<LinkPlacement>,
    /// Candidates left after self-link filtering.
    pub candidates_considered: usize,
    /// Candidates whose best anchor met the relevance floor.
    pub candidates_relevant: usize,
    /// Links missing to reach `min_links`; zero when the minimum was met.
    pub shortfall: usize,
}

/// A sentence of the content, located by byte range.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SentenceSpan {
    /// Byte offset of the first byte after the previous terminator.
    pub start: usize,
    /// Byte offset of this sentence's terminator.
    pub end: usize,
    /// Text content with tags removed.
    pub text: String,
}

/// A candidate that survived scoring.
#[derive(Debug, Clone)]
struct ScoredCandidate<'a> {
    candidate: &'a LinkCandidate,
    anchor: String,
    score: RelevanceScore,
}

/// Insert links to the most relevant `candidates` into `content`.
///
/// Never links to `exclude_target_url`, never places two links closer than
/// `config.min_distance_between_links` characters, and stops at
/// `config.max_links`. A shortfall below `config.min_links` is reported
/// through [`InjectionResult::shortfall`], not as an error.
#[instrument(skip_all, fields(candidates = candidates.len(), max_links = config.max_links))]
pub fn inject(
    content: &str,
    candidates: &[LinkCandidate],
    exclude_target_url: &str,
    config: &LinkingConfig,
) -> InjectionResult {
    let own_url = normalize_url(exclude_target_url);
    let eligible: Vec<&LinkCandidate> = candidates
        .iter()
        .filter(|c| !c.target_identifier.trim().is_empty())
        .filter(|c| own_url.is_empty() || normalize_url(&c.target_identifier) != own_url)
        .collect();

    let plain = text::strip_tags(content);

    let mut ranked: Vec<ScoredCandidate<'_>> = eligible
        .iter()
        .filter_map(|c| best_anchor(&plain, *c, config))
        .filter(|sc| {
            let keep = sc.score.composite >= config.min_relevance;
            if !keep {
                debug!(
                    url = %sc.candidate.target_identifier,
                    composite = sc.score.composite,
                    "candidate below relevance floor"
                );
            }
            keep
        })
        .collect();
    ranked.sort_by(|a, b| b.score.composite.total_cmp(&a.score.composite));

    let sentences = locate_sentences(content);
    let sentence_texts: Vec<&str> = sentences.iter().map(|s| s.text.as_str()).collect();

    // Character offset of each sentence terminator in the original content.
    let char_ends = char_offsets(content, sentences.iter().map(|s| s.end));

    let mut used: HashSet<usize> = HashSet::new();
    // (sentence index, inserted markup, candidate)
    let mut accepted: Vec<(usize, String, &ScoredCandidate<'_>)> = Vec::new();

    for scored in &ranked {
        if accepted.len() >= config.max_links {
            break;
        }

        let topics = placement_topics(scored);
        let order = placement::rank_sentences(&sentence_texts, &topics, sentences.len(), &used);

        let markup = link_markup(&scored.candidate.target_identifier, &scored.anchor);
        let markup_chars = markup.chars().count();
        let chosen = order.into_iter().find(|&idx| {
            let trial: Vec<(usize, usize)> = accepted
                .iter()
                .map(|(i, m, _)| (char_ends[*i], m.chars().count()))
                .chain(std::iter::once((char_ends[idx], markup_chars)))
                .collect();
            respects_distance(&trial, config.min_distance_between_links)
        });

        match chosen {
            Some(idx) => {
                used.insert(idx);
                accepted.push((idx, markup, scored));
            }
            None => debug!(
                url = %scored.candidate.target_identifier,
                "no sentence keeps the minimum link distance"
            ),
        }
    }

    accepted.sort_by_key(|(idx, _, _)| sentences[*idx].end);

    let extra: usize = accepted.iter().map(|(_, markup, _)| markup.len()).sum();
    let mut html = String::with_capacity(content.len() + extra);
    let mut links_added = Vec::with_capacity(accepted.len());
    let mut cursor = 0;
    let mut shift = 0;
    for (idx, markup, scored) in &accepted {
        let pos = sentences[*idx].end;
        html.push_str(&content[cursor..pos]);
        links_added.push(LinkPlacement {
            anchor_text: scored.anchor.clone(),
            target_identifier: scored.candidate.target_identifier.clone(),
            insert_position: char_ends[*idx] + shift,
            relevance_score: scored.score.composite,
        });
        html.push_str(markup);
        shift += markup.chars().count();
        cursor = pos;
    }
    html.push_str(&content[cursor..]);
    let shortfall = config.min_links.saturating_sub(links_added.len());

    info!(
        considered = eligible.len(),
        relevant = ranked.len(),
        placed = links_added.len(),
        shortfall,
        "link injection complete"
    );

    InjectionResult {
        html,
        links_added,
        candidates_considered: eligible.len(),
        candidates_relevant: ranked.len(),
        shortfall,
    }
}

/// Score every anchor variant and keep the best one within the word bounds.
fn best_anchor<'a>(
    plain: &str,
    candidate: &'a LinkCandidate,
    config: &LinkingConfig,
) -> Option<ScoredCandidate<'a>> {
    anchor_variants(&candidate.target_title)
        .into_iter()
        .filter(|anchor| {
            let n = text::words(anchor).count();
            n >= config.min_anchor_words && n <= config.max_anchor_words
        })
        .map(|anchor| {
            let score = relevance::score_with_title(
                plain,
                &candidate.target_title,
                &candidate.target_text,
                &anchor,
            );
            ScoredCandidate {
                candidate,
                anchor,
                score,
            }
        })
        .max_by(|a, b| {
            a.score
                .composite
                .total_cmp(&b.score.composite)
                // Prefer the earlier variant on equal score.
                .then(std::cmp::Ordering::Greater)
        })
}

/// Anchor text variants for a target title: the literal title, the title
/// without stop words, and connective phrasings of the stripped title.
pub(crate) fn anchor_variants(title: &str) -> Vec<String> {
    let literal = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if literal.is_empty() {
        return Vec::new();
    }

    let stripped = literal
        .split_whitespace()
        .filter(|w| !text::is_stop_word(w.trim_matches(|c: char| !c.is_alphanumeric())))
        .collect::<Vec<_>>()
        .join(" ");

    let mut raw = vec![literal, stripped.clone()];
    if !stripped.is_empty() {
        raw.push(format!("learn more about {stripped}"));
        raw.push(format!("our guide on {stripped}"));
        raw.push(format!("a closer look at {stripped}"));
    }

    let mut seen = HashSet::new();
    raw.into_iter()
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.to_lowercase()))
        .take(MAX_ANCHOR_VARIANTS)
        .collect()
}

/// Topics used to find a matching sentence for a candidate.
fn placement_topics(scored: &ScoredCandidate<'_>) -> Vec<String> {
    let mut topics = vec![scored.candidate.target_title.clone(), scored.anchor.clone()];
    topics.extend(
        scored
            .candidate
            .target_title
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.chars().count() >= text::MIN_TERM_LEN && !text::is_stop_word(w)),
    );
    topics.extend(text::ranked_terms(&scored.candidate.target_text, TOPIC_TERMS));
    topics
}

/// Character offsets for ascending byte offsets into `content`.
fn char_offsets(content: &str, byte_offsets: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut counted = 0;
    let mut chars = 0;
    byte_offsets
        .map(|pos| {
            chars += content[counted..pos].chars().count();
            counted = pos;
            chars
        })
        .collect()
}

/// Check that every pair of insertions stays `min_distance` apart once all of
/// them are applied. Input is `(original char offset, inserted char length)`.
fn respects_distance(insertions: &[(usize, usize)], min_distance: usize) -> bool {
    let offsets = final_offsets(insertions);
    offsets.windows(2).all(|w| w[1] - w[0] >= min_distance)
}

/// Offsets of each insertion in the rewritten text, ascending.
fn final_offsets(insertions: &[(usize, usize)]) -> Vec<usize> {
    let mut sorted = insertions.to_vec();
    sorted.sort_by_key(|(pos, _)| *pos);
    let mut shift = 0;
    sorted
        .into_iter()
        .map(|(pos, len)| {
            let offset = pos + shift;
            shift += len;
            offset
        })
        .collect()
}

fn link_markup(url: &str, anchor: &str) -> String {
    format!(
        " (<a href=\"{}\" class=\"related-link\">{}</a>)",
        escape_html(url),
        escape_html(anchor)
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

/// Locate sentences in HTML (or plain text) content.
///
/// A terminator counts only outside markup and blocking elements, and only
/// when followed by whitespace, a tag, or the end of input. Trailing text
/// without a terminator is not a sentence.
pub(crate) fn locate_sentences(content: &str) -> Vec<SentenceSpan> {
    let mut spans = Vec::new();
    let mut blocked: usize = 0;
    let mut in_tag = false;
    let mut tag = String::new();
    let mut buf = String::new();
    let mut start = 0;

    let mut chars = content.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if in_tag {
            tag.push(c);
            if c == '>' {
                in_tag = false;
                if update_blocking(&tag, &mut blocked) && blocked == 0 {
                    // Heading or code text does not lead into the next sentence.
                    buf.clear();
                    start = i + 1;
                }
            }
            continue;
        }
        if c == '<' {
            in_tag = true;
            tag.clear();
            tag.push(c);
            buf.push(' ');
            continue;
        }

        buf.push(c);
        if blocked > 0 || !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let boundary = match chars.peek() {
            None => true,
            Some((_, next)) => next.is_whitespace() || *next == '<',
        };
        if !boundary {
            continue;
        }

        let sentence = buf.trim();
        if sentence.len() > c.len_utf8() {
            spans.push(SentenceSpan {
                start,
                end: i,
                text: text::strip_tags(sentence).trim().to_string(),
            });
        }
        buf.clear();
        start = i + c.len_utf8();
    }

    spans
}

/// Track nesting of blocking elements. Returns true when a blocking element
/// other than `<a>` just closed.
fn update_blocking(tag: &str, blocked: &mut usize) -> bool {
    let inner = tag.trim_start_matches('<').trim_end_matches('>');
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    if inner.trim_end().ends_with('/') {
        return false;
    }
    let name: String = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    if !BLOCKING_TAGS.contains(&name.as_str()) {
        return false;
    }
    if closing {
        *blocked = blocked.saturating_sub(1);
        name != "a"
    } else {
        *blocked += 1;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "Sourdough baking starts with a healthy starter kept in a glass jar. \
        Feed the starter with rye flour and filtered water every morning before work. \
        The Tartine method from San Francisco popularised long, cool fermentation for flavour. \
        Chad Robertson shaped loaves gently and proofed them overnight in the fridge. \
        A high hydration dough feels sticky at first but rewards patient stretch and folds. \
        Bake the loaf inside a preheated Dutch Oven so steam builds a crackling crust. \
        Let the bread cool completely on a wire rack before slicing into the crumb. \
        Store leftover slices in a linen bag and refresh them in a hot oven later. \
        Discard from the starter can become crackers, pancakes, or flatbread dough. \
        Keep notes on timing and temperature so every bake improves on the last one.";

    fn related(id: &str, title: &str) -> LinkCandidate {
        LinkCandidate {
            target_identifier: id.into(),
            target_title: title.into(),
            target_text: ARTICLE.into(),
        }
    }

    fn unrelated() -> Vec<LinkCandidate> {
        vec![
            LinkCandidate {
                target_identifier: "https://blog.example.com/crypto-taxes".into(),
                target_title: "Crypto Capital Gains Reporting".into(),
                target_text: "Ledger exports list every token swap. Accountants reconcile \
                    exchange statements quarterly. Wallet addresses need labelling."
                    .into(),
            },
            LinkCandidate {
                target_identifier: "https://blog.example.com/marathon".into(),
                target_title: "Marathon Pacing Strategy".into(),
                target_text: "Runners taper mileage during final weeks. Tempo intervals \
                    build lactate threshold. Hydration belts carry electrolyte gels."
                    .into(),
            },
            LinkCandidate {
                target_identifier: "https://blog.example.com/k8s".into(),
                target_title: "Kubernetes Network Policies".into(),
                target_text: "Calico enforces ingress rules. Envoy sidecars terminate mutual \
                    certificates. Namespaces isolate tenant workloads."
                    .into(),
            },
        ]
    }

    fn config() -> LinkingConfig {
        LinkingConfig {
            min_links: 1,
            max_links: 3,
            min_anchor_words: 2,
            max_anchor_words: 8,
            min_relevance: 50.0,
            min_distance_between_links: 200,
            enforce_min_links: false,
        }
    }

    fn strip_inserted(html: &str) -> String {
        let re = regex::Regex::new(r#" \(<a href="[^"]*" class="related-link">[^<]*</a>\)"#)
            .expect("valid regex");
        re.replace_all(html, "").to_string()
    }

    #[test]
    fn places_only_candidates_above_threshold() {
        let mut candidates = unrelated();
        candidates.insert(1, related("https://blog.example.com/starter", "Sourdough Starter Care"));
        candidates.push(related("https://blog.example.com/dutch-oven", "Dutch Oven Bread Baking"));
        assert_eq!(candidates.len(), 5);

        let result = inject(ARTICLE, &candidates, "https://blog.example.com/this-post", &config());

        assert_eq!(result.candidates_considered, 5);
        assert_eq!(result.candidates_relevant, 2);
        assert_eq!(result.links_added.len(), 2);
        let targets: HashSet<&str> = result
            .links_added
            .iter()
            .map(|l| l.target_identifier.as_str())
            .collect();
        assert!(targets.contains("https://blog.example.com/starter"));
        assert!(targets.contains("https://blog.example.com/dutch-oven"));
        assert_eq!(result.shortfall, 0);
    }

    #[test]
    fn nothing_relevant_places_nothing() {
        let result = inject(ARTICLE, &unrelated(), "", &config());
        assert!(result.links_added.is_empty());
        assert_eq!(result.html, ARTICLE);
        assert_eq!(result.shortfall, 1);
    }

    #[test]
    fn never_links_to_own_page() {
        let candidates = vec![
            related("https://blog.example.com/sourdough/", "Sourdough Starter Care"),
            related("https://blog.example.com/other", "Dutch Oven Bread Baking"),
        ];
        let result = inject(ARTICLE, &candidates, "https://blog.example.com/sourdough", &config());
        assert_eq!(result.candidates_considered, 1);
        assert!(
            result
                .links_added
                .iter()
                .all(|l| l.target_identifier != "https://blog.example.com/sourdough/")
        );
        assert!(!result.html.contains("/sourdough/\""));
    }

    #[test]
    fn placements_respect_minimum_distance() {
        let candidates: Vec<LinkCandidate> = (0..6)
            .map(|i| related(&format!("https://blog.example.com/p{i}"), "Sourdough Starter Feeding Guide"))
            .collect();
        let mut cfg = config();
        cfg.max_links = 6;
        cfg.min_distance_between_links = 250;

        let result = inject(ARTICLE, &candidates, "", &cfg);
        assert!(!result.links_added.is_empty());
        for pair in result.links_added.windows(2) {
            assert!(pair[1].insert_position - pair[0].insert_position >= 250);
        }
    }

    #[test]
    fn max_links_caps_placements() {
        let candidates: Vec<LinkCandidate> = (0..5)
            .map(|i| related(&format!("https://blog.example.com/p{i}"), "Sourdough Starter Care"))
            .collect();
        let mut cfg = config();
        cfg.max_links = 2;
        cfg.min_distance_between_links = 10;

        let result = inject(ARTICLE, &candidates, "", &cfg);
        assert_eq!(result.links_added.len(), 2);
    }

    #[test]
    fn content_outside_links_is_unchanged() {
        let html = format!("<h2>Sourdough Basics.</h2><p>{ARTICLE}</p>");
        let candidates = vec![
            related("https://blog.example.com/a", "Sourdough Starter Care"),
            related("https://blog.example.com/b", "Dutch Oven Bread Baking"),
        ];
        let result = inject(&html, &candidates, "", &config());

        assert!(!result.links_added.is_empty());
        assert_eq!(strip_inserted(&result.html), html);
        for link in &result.links_added {
            let tail: String = result.html.chars().skip(link.insert_position).collect();
            assert!(tail.starts_with(" (<a href=\""));
            let words = link.anchor_text.split_whitespace().count();
            assert!((2..=8).contains(&words));
        }
        // Headings never receive links.
        assert!(result.html.starts_with("<h2>Sourdough Basics.</h2>"));
    }

    #[test]
    fn distance_counts_characters_not_bytes() {
        // 22 characters but 82 bytes between the two terminators.
        let content = format!("Levain naturel pour le pain. {}.", "🍞".repeat(20));
        let candidates: Vec<LinkCandidate> = ["a", "b"]
            .iter()
            .map(|id| LinkCandidate {
                target_identifier: format!("https://blog.example.com/{id}"),
                target_title: "Levain Naturel".into(),
                target_text: "Levain naturel pour le pain de campagne.".into(),
            })
            .collect();
        let cfg = LinkingConfig {
            min_links: 2,
            max_links: 2,
            min_anchor_words: 2,
            max_anchor_words: 2,
            min_relevance: 0.0,
            min_distance_between_links: 120,
            enforce_min_links: false,
        };

        // Markup is 79 characters, so the second link would sit 101
        // characters (161 bytes) after the first.
        let result = inject(&content, &candidates, "", &cfg);
        assert_eq!(result.links_added.len(), 1);
        assert_eq!(result.shortfall, 1);
        let link = &result.links_added[0];
        assert_eq!(link.insert_position, "Levain naturel pour le pain".chars().count());
        let tail: String = result.html.chars().skip(link.insert_position).collect();
        assert!(tail.starts_with(" (<a href=\""));

        let mut relaxed = cfg.clone();
        relaxed.min_distance_between_links = 100;
        let result = inject(&content, &candidates, "", &relaxed);
        assert_eq!(result.links_added.len(), 2);
        let second = &result.links_added[1];
        assert_eq!(second.insert_position - result.links_added[0].insert_position, 101);
        let tail: String = result.html.chars().skip(second.insert_position).collect();
        assert!(tail.starts_with(" (<a href=\""));
    }

    #[test]
    fn char_offsets_count_multibyte_characters() {
        let content = "é.ü. x.";
        let ends: Vec<usize> = content.match_indices('.').map(|(i, _)| i).collect();
        assert_eq!(ends, vec![2, 5, 8]);
        assert_eq!(char_offsets(content, ends.into_iter()), vec![1, 3, 6]);
    }

    #[test]
    fn anchor_variants_are_deduplicated_and_capped() {
        let variants = anchor_variants("The Guide to Sourdough");
        assert_eq!(variants[0], "The Guide to Sourdough");
        assert_eq!(variants[1], "Guide Sourdough");
        assert!(variants.len() <= MAX_ANCHOR_VARIANTS);
        assert!(variants.iter().any(|v| v.starts_with("learn more about")));

        let variants = anchor_variants("Sourdough");
        let unique: HashSet<String> = variants.iter().map(|v| v.to_lowercase()).collect();
        assert_eq!(unique.len(), variants.len());
        assert!(anchor_variants("   ").is_empty());
    }

    #[test]
    fn sentence_scanner_skips_markup_and_decimals() {
        let html = "<h2>Title.</h2><p>Use 2.5 cups. See <a href=\"x.html\">this. link</a> now! Done</p>";
        let spans = locate_sentences(html);
        let texts: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Use 2.5 cups.", "See  this. link  now!"]);
        for span in &spans {
            assert!(matches!(&html[span.end..span.end + 1], "." | "!"));
        }
    }

    #[test]
    fn final_offsets_shift_by_earlier_insertions() {
        let offsets = final_offsets(&[(100, 10), (20, 5)]);
        assert_eq!(offsets, vec![20, 105]);
        assert!(respects_distance(&[(100, 10), (20, 5)], 85));
        assert!(!respects_distance(&[(100, 10), (20, 5)], 86));
    }
}
