//! Per-run pipeline state and its transition function.
//!
//! A [`PipelineState`] is owned by the orchestrator for the duration of a run.
//! Stage handlers read it and return a [`StageOutput`]; the orchestrator folds
//! that output back in with [`PipelineState::apply`]. The state serializes to
//! JSON so a paused run can be saved and resumed later.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use postforge_shared::{
    CompetitorAnalysis, FaqItem, FinalDocument, GapAnalysis, GeneratedDocument, LinkCandidate,
    LinkPlacement, Outline, PriorArticle, PublishedPost, QaReport, Reference, RunId, VideoEmbed,
};

use crate::stages::{self, STAGE_COUNT};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generated article plus its rendered body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub document: GeneratedDocument,
    /// Body HTML; later stages rewrite it (video, links).
    pub body_html: String,
}

impl GeneratedContent {
    pub fn is_empty(&self) -> bool {
        self.document.is_empty() || self.body_html.trim().is_empty()
    }
}

/// A non-critical failure or shortfall recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageWarning {
    pub stage: u8,
    pub name: String,
    pub message: String,
}

/// Value produced by one stage handler.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    ConfigValidated,
    PriorArticles(Vec<PriorArticle>),
    Gaps(GapAnalysis),
    Competitors(CompetitorAnalysis),
    Outline(Outline),
    LinkTargets(Vec<LinkCandidate>),
    Generated(GeneratedContent),
    Video {
        video: Option<VideoEmbed>,
        body_html: String,
    },
    Faq(Vec<FaqItem>),
    References(Vec<Reference>),
    Links {
        placements: Vec<LinkPlacement>,
        body_html: String,
        /// Set when fewer than `min_links` could be placed.
        shortfall: Option<String>,
    },
    Schema(serde_json::Value),
    Document(FinalDocument),
    Quality(QaReport),
    /// `None` on dry runs.
    Published(Option<PublishedPost>),
}

impl StageOutput {
    /// Ordinal of the stage that produces this output.
    pub fn stage(&self) -> u8 {
        match self {
            Self::ConfigValidated => stages::VALIDATE_CONFIG,
            Self::PriorArticles(_) => stages::RETRIEVE_PRIOR_CONTENT,
            Self::Gaps(_) => stages::ANALYZE_GAPS,
            Self::Competitors(_) => stages::ANALYZE_COMPETITORS,
            Self::Outline(_) => stages::BUILD_OUTLINE,
            Self::LinkTargets(_) => stages::DISCOVER_LINK_TARGETS,
            Self::Generated(_) => stages::GENERATE_CONTENT,
            Self::Video { .. } => stages::INJECT_VIDEO,
            Self::Faq(_) => stages::GENERATE_FAQ,
            Self::References(_) => stages::DISCOVER_REFERENCES,
            Self::Links { .. } => stages::INJECT_LINKS,
            Self::Schema(_) => stages::ASSEMBLE_SCHEMA,
            Self::Document(_) => stages::ASSEMBLE_DOCUMENT,
            Self::Quality(_) => stages::VALIDATE_QUALITY,
            Self::Published(_) => stages::PUBLISH,
        }
    }
}

/// Everything known about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: RunId,
    pub keyword: String,
    pub title: String,
    /// The article's own URL, never linked to.
    #[serde(default)]
    pub target_url: Option<String>,
    /// Remote post to update instead of creating a new one.
    #[serde(default)]
    pub post_id: Option<u64>,
    /// Ordinal currently (or last) executing; 0 before the first stage.
    pub current_step: u8,
    pub completed_steps: BTreeSet<u8>,
    pub status: RunStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub failed_stage: Option<u8>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall time per completed stage, in milliseconds.
    #[serde(default)]
    pub durations_ms: BTreeMap<u8, u64>,
    #[serde(default)]
    pub warnings: Vec<StageWarning>,

    #[serde(default)]
    pub prior_articles: Vec<PriorArticle>,
    #[serde(default)]
    pub gap_analysis: Option<GapAnalysis>,
    #[serde(default)]
    pub competitor_analysis: Option<CompetitorAnalysis>,
    #[serde(default)]
    pub outline: Option<Outline>,
    #[serde(default)]
    pub link_targets: Vec<LinkCandidate>,
    #[serde(default)]
    pub generated: Option<GeneratedContent>,
    #[serde(default)]
    pub video: Option<VideoEmbed>,
    #[serde(default)]
    pub faq: Vec<FaqItem>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub links: Vec<LinkPlacement>,
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
    #[serde(default)]
    pub final_document: Option<FinalDocument>,
    #[serde(default)]
    pub qa: Option<QaReport>,
    #[serde(default)]
    pub publication: Option<PublishedPost>,
}

impl PipelineState {
    /// Fresh idle state for a new run.
    pub fn new(keyword: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: RunId::new(),
            keyword: keyword.into(),
            title: title.into(),
            target_url: None,
            post_id: None,
            current_step: 0,
            completed_steps: BTreeSet::new(),
            status: RunStatus::Idle,
            error: None,
            failed_stage: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
            durations_ms: BTreeMap::new(),
            warnings: Vec::new(),
            prior_articles: Vec::new(),
            gap_analysis: None,
            competitor_analysis: None,
            outline: None,
            link_targets: Vec::new(),
            generated: None,
            video: None,
            faq: Vec::new(),
            references: Vec::new(),
            links: Vec::new(),
            schema: None,
            final_document: None,
            qa: None,
            publication: None,
        }
    }

    pub fn is_completed(&self, ordinal: u8) -> bool {
        self.completed_steps.contains(&ordinal)
    }

    /// Ordinals below `ordinal` that have not completed, ascending.
    pub fn missing_prerequisites(&self, ordinal: u8) -> Vec<u8> {
        (1..ordinal).filter(|k| !self.is_completed(*k)).collect()
    }

    /// First stage that still has to run, if any.
    pub fn next_stage(&self) -> Option<u8> {
        (1..=STAGE_COUNT).find(|k| !self.is_completed(*k))
    }

    /// Fold a stage output into the state.
    pub fn apply(mut self, output: StageOutput) -> Self {
        match output {
            StageOutput::ConfigValidated => {}
            StageOutput::PriorArticles(articles) => self.prior_articles = articles,
            StageOutput::Gaps(gaps) => self.gap_analysis = Some(gaps),
            StageOutput::Competitors(competitors) => self.competitor_analysis = Some(competitors),
            StageOutput::Outline(outline) => self.outline = Some(outline),
            StageOutput::LinkTargets(targets) => self.link_targets = targets,
            StageOutput::Generated(content) => self.generated = Some(content),
            StageOutput::Video { video, body_html } => {
                self.video = video;
                self.set_body(body_html);
            }
            StageOutput::Faq(items) => self.faq = items,
            StageOutput::References(refs) => self.references = refs,
            StageOutput::Links {
                placements,
                body_html,
                shortfall,
            } => {
                self.links = placements;
                self.set_body(body_html);
                if let Some(message) = shortfall {
                    self.push_warning(stages::INJECT_LINKS, message);
                }
            }
            StageOutput::Schema(graph) => self.schema = Some(graph),
            StageOutput::Document(doc) => self.final_document = Some(doc),
            StageOutput::Quality(report) => {
                if report.critical_failures > 0 {
                    let message = format!(
                        "quality check reported {} critical failure(s), score {:.0}",
                        report.critical_failures, report.score
                    );
                    self.push_warning(stages::VALIDATE_QUALITY, message);
                }
                self.qa = Some(report);
            }
            StageOutput::Published(post) => self.publication = post,
        }
        self.updated_at = Utc::now();
        self
    }

    /// Mark `ordinal` complete and record its duration.
    pub fn mark_completed(&mut self, ordinal: u8, duration_ms: u64) {
        self.completed_steps.insert(ordinal);
        self.durations_ms.insert(ordinal, duration_ms);
        self.updated_at = Utc::now();
    }

    pub fn push_warning(&mut self, ordinal: u8, message: impl Into<String>) {
        let name = stages::definition(ordinal)
            .map(|d| d.name)
            .unwrap_or("unknown");
        self.warnings.push(StageWarning {
            stage: ordinal,
            name: name.to_string(),
            message: message.into(),
        });
    }

    pub(crate) fn fail(&mut self, ordinal: u8, message: String) {
        self.status = RunStatus::Failed;
        self.failed_stage = Some(ordinal);
        self.error = Some(message);
        self.finish();
    }

    pub(crate) fn finish(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    fn set_body(&mut self, body_html: String) {
        if let Some(generated) = self.generated.as_mut() {
            generated.body_html = body_html;
        }
    }

    /// Serialize for saving a paused run.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
