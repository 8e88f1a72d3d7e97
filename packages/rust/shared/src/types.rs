//! Core domain types for Postforge runs and articles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Post status understood by the publishing backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    #[default]
    Draft,
    Publish,
    Pending,
    Private,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Publish => "publish",
            Self::Pending => "pending",
            Self::Private => "private",
        }
    }
}

impl std::str::FromStr for PublishStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "publish" => Ok(Self::Publish),
            "pending" => Ok(Self::Pending),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown publish status '{other}'")),
        }
    }
}

/// A post created or updated on the remote site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedPost {
    /// Remote resource identifier.
    pub id: u64,
    /// Public URL of the post.
    pub url: String,
    /// Status the backend reports for the post.
    pub status: PublishStatus,
}

// ---------------------------------------------------------------------------
// Linking
// ---------------------------------------------------------------------------

/// A page that may receive a cross-reference from the article being built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkCandidate {
    /// Usually the target's public URL.
    pub target_identifier: String,
    pub target_title: String,
    /// Plain body text of the target.
    pub target_text: String,
}

/// A link that was inserted into the article body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkPlacement {
    pub anchor_text: String,
    pub target_identifier: String,
    /// Character offset in the rewritten body where the inserted link span
    /// starts.
    pub insert_position: usize,
    /// Composite relevance of the chosen anchor, 0–100.
    pub relevance_score: f64,
}

// ---------------------------------------------------------------------------
// Analyses and generation
// ---------------------------------------------------------------------------

/// A previously published article, used as generation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorArticle {
    pub url: String,
    pub title: String,
    pub keyword: String,
    #[serde(default)]
    pub excerpt: String,
    pub published_at: DateTime<Utc>,
}

/// Topics the site has not covered yet for a keyword.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysis {
    #[serde(default)]
    pub missing_topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// What ranking competitor pages cover for a keyword.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetitorAnalysis {
    /// Headings that recur across competitor pages.
    #[serde(default)]
    pub common_headings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_word_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Planned article structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub sections: Vec<OutlineSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub heading: String,
    #[serde(default)]
    pub points: Vec<String>,
}

/// Shape limits passed to the content generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureConstraints {
    #[serde(default = "default_min_sections")]
    pub min_sections: usize,
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,
    #[serde(default = "default_min_paragraphs")]
    pub min_paragraphs_per_section: usize,
    #[serde(default = "default_max_paragraphs")]
    pub max_paragraphs_per_section: usize,
    #[serde(default = "default_min_words")]
    pub min_words_per_paragraph: usize,
    #[serde(default = "default_max_words")]
    pub max_words_per_paragraph: usize,
}

impl Default for StructureConstraints {
    fn default() -> Self {
        Self {
            min_sections: default_min_sections(),
            max_sections: default_max_sections(),
            min_paragraphs_per_section: default_min_paragraphs(),
            max_paragraphs_per_section: default_max_paragraphs(),
            min_words_per_paragraph: default_min_words(),
            max_words_per_paragraph: default_max_words(),
        }
    }
}

fn default_min_sections() -> usize {
    4
}
fn default_max_sections() -> usize {
    8
}
fn default_min_paragraphs() -> usize {
    2
}
fn default_max_paragraphs() -> usize {
    4
}
fn default_min_words() -> usize {
    40
}
fn default_max_words() -> usize {
    120
}

/// Everything the content generator receives for one article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub keyword: String,
    pub title: String,
    /// Titles and excerpts of prior articles.
    #[serde(default)]
    pub prior_context: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline: Option<Outline>,
    pub constraints: StructureConstraints,
}

/// Structured article returned by the content generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub title: String,
    pub sections: Vec<DocumentSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSection {
    pub heading: String,
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub text: String,
    /// Phrases the generator marked as good anchor material.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchor_candidates: Vec<String>,
}

impl GeneratedDocument {
    /// True when no section carries any paragraph text.
    pub fn is_empty(&self) -> bool {
        self.sections
            .iter()
            .flat_map(|s| &s.paragraphs)
            .all(|p| p.text.trim().is_empty())
    }

    /// Whitespace-delimited word count over all paragraphs.
    pub fn word_count(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|s| &s.paragraphs)
            .map(|p| p.text.split_whitespace().count())
            .sum()
    }

    /// All paragraph text joined with blank lines.
    pub fn plain_text(&self) -> String {
        self.sections
            .iter()
            .flat_map(|s| &s.paragraphs)
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ---------------------------------------------------------------------------
// Enrichments
// ---------------------------------------------------------------------------

/// Supplementary video placed in the article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEmbed {
    /// Embeddable player URL.
    pub embed_url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqItem {
    pub question: String,
    pub answer: String,
}

/// An external source cited by the article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// The fully assembled article, ready for validation and publishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDocument {
    pub title: String,
    pub slug: String,
    pub html: String,
    pub excerpt: String,
    pub word_count: usize,
    /// Serialized JSON-LD graph, if schema assembly succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_json: Option<String>,
}

/// Result of automated quality validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaReport {
    /// 0–100.
    pub score: f64,
    /// Number of failed rules marked critical.
    pub critical_failures: usize,
    pub rules: Vec<QaRuleOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaRuleOutcome {
    pub rule: String,
    pub passed: bool,
    pub critical: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(text: &str) -> Paragraph {
        Paragraph {
            text: text.into(),
            anchor_candidates: vec![],
        }
    }

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn publish_status_serde() {
        let json = serde_json::to_string(&PublishStatus::Publish).expect("serialize");
        assert_eq!(json, r#""publish""#);
        let parsed: PublishStatus = serde_json::from_str(r#""private""#).expect("deserialize");
        assert_eq!(parsed, PublishStatus::Private);
        assert!("scheduled".parse::<PublishStatus>().is_err());
    }

    #[test]
    fn generated_document_counts_words() {
        let doc = GeneratedDocument {
            title: "Sourdough".into(),
            sections: vec![
                DocumentSection {
                    heading: "Starter".into(),
                    paragraphs: vec![paragraph("Feed it daily."), paragraph("Keep it warm")],
                },
                DocumentSection {
                    heading: "Baking".into(),
                    paragraphs: vec![paragraph("Preheat the oven.")],
                },
            ],
        };
        assert_eq!(doc.word_count(), 9);
        assert!(!doc.is_empty());
        assert!(doc.plain_text().contains("Keep it warm\n\nPreheat"));
    }

    #[test]
    fn blank_document_is_empty() {
        let doc = GeneratedDocument {
            title: "Empty".into(),
            sections: vec![DocumentSection {
                heading: "Nothing".into(),
                paragraphs: vec![paragraph("   ")],
            }],
        };
        assert!(doc.is_empty());
        assert!(GeneratedDocument::default().is_empty());
    }

    #[test]
    fn paragraph_without_anchors_omits_field() {
        let json = serde_json::to_string(&paragraph("Text")).expect("serialize");
        assert!(!json.contains("anchor_candidates"));
        let parsed: Paragraph = serde_json::from_str(r#"{"text":"Hi"}"#).expect("deserialize");
        assert!(parsed.anchor_candidates.is_empty());
    }
}
