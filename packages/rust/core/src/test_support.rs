//! Scriptable collaborators for orchestrator and handler tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use postforge_publisher::{PublishError, PublishRequest};
use postforge_shared::{
    CompetitorAnalysis, DocumentSection, FaqItem, FinalDocument, GapAnalysis, GeneratedDocument,
    GenerationRequest, LinkCandidate, Outline, OutlineSection, Paragraph, PostforgeError,
    PriorArticle, PublishStatus, PublishedPost, QaReport, Reference, Result, VideoEmbed,
};

use crate::assembler;
use crate::collaborators::{
    ContentAnalyzer, ContentGenerator, MediaFinder, PriorContentSource, Publisher,
    QualityValidator, ReferenceFinder, Services, TargetDiscovery,
};
use crate::pipeline::PipelineConfig;
use crate::quality::RuleValidator;
use crate::state::{GeneratedContent, PipelineState};

/// Every collaborator in one value. Configure the public fields, then call
/// [`Mock::into_services`].
#[derive(Default)]
pub(crate) struct Mock {
    /// Collaborator calls (by method name) that fail.
    pub fail: HashSet<&'static str>,
    /// `generate` returns a document with only blank paragraphs.
    pub empty_document: bool,
    /// Sleep this long inside the named call.
    pub slow: Option<(&'static str, Duration)>,
    /// Cancel the token when the named call runs.
    pub cancel_during: Option<(&'static str, CancellationToken)>,
    pub targets: Vec<LinkCandidate>,
    pub video: Option<VideoEmbed>,
    /// Recorded call names; leave at the default.
    pub(crate) calls: Mutex<Vec<&'static str>>,
}

impl Mock {
    pub fn into_services(self) -> (Arc<Self>, Services) {
        let mock = Arc::new(self);
        let services = Services {
            analyzer: mock.clone(),
            generator: mock.clone(),
            media: mock.clone(),
            references: mock.clone(),
            discovery: mock.clone(),
            prior: mock.clone(),
            publisher: mock.clone(),
            validator: mock.clone(),
        };
        (mock, services)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| **c == name).count()
    }

    async fn enter(&self, name: &'static str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(name);
        }
        if let Some((call, token)) = &self.cancel_during {
            if *call == name {
                token.cancel();
            }
        }
        if let Some((call, delay)) = self.slow {
            if call == name {
                tokio::time::sleep(delay).await;
            }
        }
        if self.fail.contains(name) {
            return Err(PostforgeError::Generation(format!("{name} unavailable")));
        }
        Ok(())
    }
}

pub(crate) const KEYWORD: &str = "sourdough starter";
pub(crate) const SITE: &str = "https://bakery.example";

fn paragraph(text: &str) -> Paragraph {
    Paragraph {
        text: text.into(),
        anchor_candidates: vec![],
    }
}

pub(crate) fn sample_document() -> GeneratedDocument {
    let section = |heading: &str, a: &str, b: &str| DocumentSection {
        heading: heading.into(),
        paragraphs: vec![paragraph(a), paragraph(b)],
    };
    GeneratedDocument {
        title: "Keeping a Sourdough Starter Alive".into(),
        sections: vec![
            section(
                "What a starter is",
                "A sourdough starter is a culture of wild yeast and bacteria living in flour and water.",
                "Bakers keep a starter for years and use it to leaven bread without commercial yeast.",
            ),
            section(
                "Feeding schedule",
                "Feeding a sourdough starter means discarding part of it and adding fresh flour and water.",
                "Most starters kept at room temperature need feeding once or twice a day.",
            ),
            section(
                "Troubleshooting",
                "A sluggish starter usually needs a warmer spot or a more frequent feeding schedule.",
                "Liquid on top of the starter is hooch, a sign the culture is hungry.",
            ),
        ],
    }
}

/// State with stages 1 to 10 complete and `text` as the generated body.
pub(crate) fn generated_state(text: &str) -> PipelineState {
    let document = GeneratedDocument {
        title: "Bread".into(),
        sections: vec![DocumentSection {
            heading: "Basics".into(),
            paragraphs: vec![paragraph(text)],
        }],
    };
    let body_html = assembler::render_body(&document, "Bread");
    let mut state = PipelineState::new(KEYWORD, "Bread");
    state.generated = Some(GeneratedContent {
        document,
        body_html,
    });
    for k in 1..=10 {
        state.mark_completed(k, 1);
    }
    state
}

impl PipelineConfig {
    pub(crate) fn for_tests() -> Self {
        Self {
            site_url: SITE.into(),
            discovery_limit: 10,
            prior_limit: 5,
            linking: Default::default(),
            structure: Default::default(),
            publish_status: PublishStatus::Draft,
            categories: vec![],
            tags: vec![],
            dry_run: false,
            timeout_override: None,
        }
    }
}

#[async_trait]
impl ContentAnalyzer for Mock {
    async fn analyze_gaps(&self, _keyword: &str, _prior: &[PriorArticle]) -> Result<GapAnalysis> {
        self.enter("analyze_gaps").await?;
        Ok(GapAnalysis {
            missing_topics: vec!["feeding schedule".into()],
            notes: None,
        })
    }

    async fn analyze_competitors(&self, _keyword: &str) -> Result<CompetitorAnalysis> {
        self.enter("analyze_competitors").await?;
        Ok(CompetitorAnalysis::default())
    }
}

#[async_trait]
impl ContentGenerator for Mock {
    async fn build_outline(
        &self,
        _keyword: &str,
        _title: &str,
        _gaps: Option<&GapAnalysis>,
        _competitors: Option<&CompetitorAnalysis>,
    ) -> Result<Outline> {
        self.enter("build_outline").await?;
        Ok(Outline {
            sections: sample_document()
                .sections
                .iter()
                .map(|s| OutlineSection {
                    heading: s.heading.clone(),
                    points: vec![],
                })
                .collect(),
        })
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedDocument> {
        self.enter("generate").await?;
        if self.empty_document {
            return Ok(GeneratedDocument {
                title: "Empty".into(),
                sections: vec![DocumentSection {
                    heading: "Nothing".into(),
                    paragraphs: vec![paragraph("  ")],
                }],
            });
        }
        Ok(sample_document())
    }

    async fn generate_faq(
        &self,
        _keyword: &str,
        _document: &GeneratedDocument,
    ) -> Result<Vec<FaqItem>> {
        self.enter("generate_faq").await?;
        Ok(vec![FaqItem {
            question: "How often should I feed a starter?".into(),
            answer: "Once or twice a day at room temperature.".into(),
        }])
    }
}

#[async_trait]
impl MediaFinder for Mock {
    async fn find_video(&self, _keyword: &str) -> Result<Option<VideoEmbed>> {
        self.enter("find_video").await?;
        Ok(self.video.clone())
    }
}

#[async_trait]
impl ReferenceFinder for Mock {
    async fn find_references(
        &self,
        _keyword: &str,
        _document: &GeneratedDocument,
    ) -> Result<Vec<Reference>> {
        self.enter("find_references").await?;
        Ok(vec![Reference {
            url: "https://example.org/fermentation".into(),
            title: "Fermentation basics".into(),
            publisher: None,
        }])
    }
}

#[async_trait]
impl TargetDiscovery for Mock {
    async fn discover_targets(&self, _site: &str, _limit: u32) -> Result<Vec<LinkCandidate>> {
        self.enter("discover_targets").await?;
        Ok(self.targets.clone())
    }
}

#[async_trait]
impl PriorContentSource for Mock {
    async fn recent_articles(&self, _site: &str, _limit: u32) -> Result<Vec<PriorArticle>> {
        self.enter("recent_articles").await?;
        Ok(vec![])
    }
}

#[async_trait]
impl Publisher for Mock {
    async fn publish(
        &self,
        request: &PublishRequest,
    ) -> std::result::Result<PublishedPost, PublishError> {
        self.enter("publish")
            .await
            .map_err(|_| PublishError::Unauthorized)?;
        Ok(PublishedPost {
            id: request.post_id.unwrap_or(101),
            url: format!("{SITE}/{}/", request.slug),
            status: request.status,
        })
    }
}

#[async_trait]
impl QualityValidator for Mock {
    async fn validate(&self, document: &FinalDocument, keyword: &str) -> Result<QaReport> {
        self.enter("validate").await?;
        let validator = RuleValidator::new(Default::default(), Some(SITE));
        Ok(validator.check(document, keyword))
    }
}
