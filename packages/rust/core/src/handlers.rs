//! Stage handlers and the ordinal → handler registry.
//!
//! Each handler reads the current [`PipelineState`], calls its collaborator
//! and returns a [`StageOutput`]. Handlers never mutate state; the
//! orchestrator folds their output in.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use postforge_publisher::PublishRequest;
use postforge_shared::GenerationRequest;

use crate::assembler::{self, AssembleInput};
use crate::collaborators::Services;
use crate::error::PipelineError;
use crate::events::PipelineObserver;
use crate::pipeline::PipelineConfig;
use crate::schema::{self, SchemaInput};
use crate::stages::{self, STAGE_COUNT};
use crate::state::{GeneratedContent, PipelineState, StageOutput};

/// What a handler gets besides the state.
pub struct StageContext<'a> {
    pub services: &'a Services,
    pub config: &'a PipelineConfig,
    /// Run-level cancellation. Stages may check it during long work; the
    /// orchestrator checks it between stages.
    pub cancel: &'a CancellationToken,
    pub observer: &'a dyn PipelineObserver,
}

impl StageContext<'_> {
    /// Report a free-text note for `ordinal` to the run's observer.
    pub fn note(&self, ordinal: u8, text: &str) {
        if let Some(def) = stages::definition(ordinal) {
            self.observer.message(def, text);
        }
    }
}

/// One pipeline stage.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn ordinal(&self) -> u8;

    /// Must match the stage table's name for [`Self::ordinal`].
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Validated table of one handler per stage ordinal.
#[derive(Clone)]
pub struct StageRegistry {
    handlers: BTreeMap<u8, Arc<dyn StageHandler>>,
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(k, h)| (k, h.name())))
            .finish()
    }
}

impl StageRegistry {
    /// The built-in handlers for all fifteen stages.
    pub fn standard() -> Result<Self, PipelineError> {
        Self::from_handlers(vec![
            Arc::new(ValidateConfig),
            Arc::new(RetrievePriorContent),
            Arc::new(AnalyzeGaps),
            Arc::new(AnalyzeCompetitors),
            Arc::new(BuildOutline),
            Arc::new(DiscoverLinkTargets),
            Arc::new(GenerateContent),
            Arc::new(InjectVideo),
            Arc::new(GenerateFaq),
            Arc::new(DiscoverReferences),
            Arc::new(InjectLinks),
            Arc::new(AssembleSchema),
            Arc::new(AssembleDocument),
            Arc::new(ValidateQuality),
            Arc::new(Publish),
        ])
    }

    /// Build a registry, rejecting duplicates, gaps, unknown ordinals and
    /// names that disagree with the stage table.
    pub fn from_handlers(handlers: Vec<Arc<dyn StageHandler>>) -> Result<Self, PipelineError> {
        let mut map = BTreeMap::new();
        for handler in handlers {
            let ordinal = handler.ordinal();
            check_handler(handler.as_ref())?;
            if map.insert(ordinal, handler).is_some() {
                return Err(PipelineError::Configuration(format!(
                    "stage {ordinal} registered twice"
                )));
            }
        }

        let missing: Vec<u8> = (1..=STAGE_COUNT).filter(|k| !map.contains_key(k)).collect();
        if !missing.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "no handler registered for stages {missing:?}"
            )));
        }
        Ok(Self { handlers: map })
    }

    /// Swap in a different handler for an existing ordinal.
    pub fn replace(&mut self, handler: Arc<dyn StageHandler>) -> Result<(), PipelineError> {
        check_handler(handler.as_ref())?;
        self.handlers.insert(handler.ordinal(), handler);
        Ok(())
    }

    pub fn get(&self, ordinal: u8) -> Option<&Arc<dyn StageHandler>> {
        self.handlers.get(&ordinal)
    }
}

fn check_handler(handler: &dyn StageHandler) -> Result<(), PipelineError> {
    let ordinal = handler.ordinal();
    let def = stages::definition(ordinal).ok_or_else(|| {
        PipelineError::Configuration(format!("stage {ordinal} is not in the stage table"))
    })?;
    if def.name != handler.name() {
        return Err(PipelineError::Configuration(format!(
            "stage {ordinal} is '{}', handler calls itself '{}'",
            def.name,
            handler.name()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared checks
// ---------------------------------------------------------------------------

/// Stage 7 must be complete and its content non-empty.
fn require_generated(state: &PipelineState, stage: u8) -> Result<&GeneratedContent, PipelineError> {
    let not_ready = || PipelineError::DependencyNotReady {
        stage,
        dependency: "generated content".into(),
    };
    if !state.is_completed(stages::GENERATE_CONTENT) {
        return Err(not_ready());
    }
    match state.generated.as_ref() {
        Some(content) if !content.is_empty() => Ok(content),
        _ => Err(not_ready()),
    }
}

fn generated_or_err(state: &PipelineState, stage: u8) -> Result<&GeneratedContent, PipelineError> {
    state
        .generated
        .as_ref()
        .ok_or_else(|| PipelineError::execution(stage, "no generated content"))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub struct ValidateConfig;

#[async_trait]
impl StageHandler for ValidateConfig {
    fn ordinal(&self) -> u8 {
        stages::VALIDATE_CONFIG
    }
    fn name(&self) -> &'static str {
        "validate_config"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        if state.keyword.trim().is_empty() {
            return Err(PipelineError::Configuration("keyword must not be empty".into()));
        }
        if state.title.trim().is_empty() {
            return Err(PipelineError::Configuration("title must not be empty".into()));
        }
        ctx.config
            .linking
            .validate()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        let structure = &ctx.config.structure;
        if structure.min_sections == 0 || structure.min_sections > structure.max_sections {
            return Err(PipelineError::Configuration(format!(
                "invalid section bounds [{}, {}]",
                structure.min_sections, structure.max_sections
            )));
        }
        if structure.min_paragraphs_per_section > structure.max_paragraphs_per_section
            || structure.min_words_per_paragraph > structure.max_words_per_paragraph
        {
            return Err(PipelineError::Configuration(
                "paragraph bounds are inverted".into(),
            ));
        }
        if ctx.config.site_url.trim().is_empty() {
            return Err(PipelineError::Configuration("site url is not set".into()));
        }
        Ok(StageOutput::ConfigValidated)
    }
}

pub struct RetrievePriorContent;

#[async_trait]
impl StageHandler for RetrievePriorContent {
    fn ordinal(&self) -> u8 {
        stages::RETRIEVE_PRIOR_CONTENT
    }
    fn name(&self) -> &'static str {
        "retrieve_prior_content"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        _state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let articles = ctx
            .services
            .prior
            .recent_articles(&ctx.config.site_url, ctx.config.prior_limit)
            .await
            .map_err(|e| PipelineError::execution(self.ordinal(), e))?;
        debug!(count = articles.len(), "prior articles retrieved");
        Ok(StageOutput::PriorArticles(articles))
    }
}

pub struct AnalyzeGaps;

#[async_trait]
impl StageHandler for AnalyzeGaps {
    fn ordinal(&self) -> u8 {
        stages::ANALYZE_GAPS
    }
    fn name(&self) -> &'static str {
        "analyze_gaps"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        ctx.services
            .analyzer
            .analyze_gaps(&state.keyword, &state.prior_articles)
            .await
            .map(StageOutput::Gaps)
            .map_err(|e| PipelineError::execution(self.ordinal(), e))
    }
}

pub struct AnalyzeCompetitors;

#[async_trait]
impl StageHandler for AnalyzeCompetitors {
    fn ordinal(&self) -> u8 {
        stages::ANALYZE_COMPETITORS
    }
    fn name(&self) -> &'static str {
        "analyze_competitors"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        ctx.services
            .analyzer
            .analyze_competitors(&state.keyword)
            .await
            .map(StageOutput::Competitors)
            .map_err(|e| PipelineError::execution(self.ordinal(), e))
    }
}

pub struct BuildOutline;

#[async_trait]
impl StageHandler for BuildOutline {
    fn ordinal(&self) -> u8 {
        stages::BUILD_OUTLINE
    }
    fn name(&self) -> &'static str {
        "build_outline"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let outline = ctx
            .services
            .generator
            .build_outline(
                &state.keyword,
                &state.title,
                state.gap_analysis.as_ref(),
                state.competitor_analysis.as_ref(),
            )
            .await
            .map_err(|e| PipelineError::execution(self.ordinal(), e))?;
        if outline.sections.is_empty() {
            return Err(PipelineError::execution(self.ordinal(), "outline has no sections"));
        }
        Ok(StageOutput::Outline(outline))
    }
}

pub struct DiscoverLinkTargets;

#[async_trait]
impl StageHandler for DiscoverLinkTargets {
    fn ordinal(&self) -> u8 {
        stages::DISCOVER_LINK_TARGETS
    }
    fn name(&self) -> &'static str {
        "discover_link_targets"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        _state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let targets = ctx
            .services
            .discovery
            .discover_targets(&ctx.config.site_url, ctx.config.discovery_limit)
            .await
            .map_err(|e| PipelineError::execution(self.ordinal(), e))?;
        debug!(count = targets.len(), "link targets discovered");
        Ok(StageOutput::LinkTargets(targets))
    }
}

pub struct GenerateContent;

#[async_trait]
impl StageHandler for GenerateContent {
    fn ordinal(&self) -> u8 {
        stages::GENERATE_CONTENT
    }
    fn name(&self) -> &'static str {
        "generate_content"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let request = GenerationRequest {
            keyword: state.keyword.clone(),
            title: state.title.clone(),
            prior_context: state
                .prior_articles
                .iter()
                .map(|a| {
                    if a.excerpt.is_empty() {
                        a.title.clone()
                    } else {
                        format!("{}: {}", a.title, a.excerpt)
                    }
                })
                .collect(),
            outline: state.outline.clone(),
            constraints: ctx.config.structure.clone(),
        };

        let document = ctx
            .services
            .generator
            .generate(&request)
            .await
            .map_err(|e| PipelineError::execution(self.ordinal(), e))?;
        if document.is_empty() {
            return Err(PipelineError::execution(
                self.ordinal(),
                "generator returned an empty document",
            ));
        }

        let body_html = assembler::render_body(&document, &state.title);
        debug!(words = document.word_count(), "content generated");
        Ok(StageOutput::Generated(GeneratedContent {
            document,
            body_html,
        }))
    }
}

pub struct InjectVideo;

#[async_trait]
impl StageHandler for InjectVideo {
    fn ordinal(&self) -> u8 {
        stages::INJECT_VIDEO
    }
    fn name(&self) -> &'static str {
        "inject_video"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let generated = require_generated(state, self.ordinal())?;
        let video = ctx
            .services
            .media
            .find_video(&state.keyword)
            .await
            .map_err(|e| PipelineError::execution(self.ordinal(), e))?;

        let body_html = match &video {
            Some(v) => assembler::insert_video(&generated.body_html, v),
            None => {
                ctx.note(self.ordinal(), "no video found, body left unchanged");
                generated.body_html.clone()
            }
        };
        Ok(StageOutput::Video { video, body_html })
    }
}

pub struct GenerateFaq;

#[async_trait]
impl StageHandler for GenerateFaq {
    fn ordinal(&self) -> u8 {
        stages::GENERATE_FAQ
    }
    fn name(&self) -> &'static str {
        "generate_faq"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let generated = generated_or_err(state, self.ordinal())?;
        let items = ctx
            .services
            .generator
            .generate_faq(&state.keyword, &generated.document)
            .await
            .map_err(|e| PipelineError::execution(self.ordinal(), e))?;
        let items = items
            .into_iter()
            .filter(|i| !i.question.trim().is_empty() && !i.answer.trim().is_empty())
            .collect();
        Ok(StageOutput::Faq(items))
    }
}

pub struct DiscoverReferences;

#[async_trait]
impl StageHandler for DiscoverReferences {
    fn ordinal(&self) -> u8 {
        stages::DISCOVER_REFERENCES
    }
    fn name(&self) -> &'static str {
        "discover_references"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let generated = generated_or_err(state, self.ordinal())?;
        let refs = ctx
            .services
            .references
            .find_references(&state.keyword, &generated.document)
            .await
            .map_err(|e| PipelineError::execution(self.ordinal(), e))?;
        let refs = refs
            .into_iter()
            .filter(|r| url::Url::parse(&r.url).is_ok())
            .collect();
        Ok(StageOutput::References(refs))
    }
}

pub struct InjectLinks;

#[async_trait]
impl StageHandler for InjectLinks {
    fn ordinal(&self) -> u8 {
        stages::INJECT_LINKS
    }
    fn name(&self) -> &'static str {
        "inject_links"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let generated = require_generated(state, self.ordinal())?;
        let linking = &ctx.config.linking;
        let result = postforge_linking::inject(
            &generated.body_html,
            &state.link_targets,
            state.target_url.as_deref().unwrap_or_default(),
            linking,
        );

        let shortfall = (result.shortfall > 0).then(|| {
            format!(
                "placed {} of at least {} links ({} of {} candidates relevant)",
                result.links_added.len(),
                linking.min_links,
                result.candidates_relevant,
                result.candidates_considered
            )
        });
        if let Some(message) = &shortfall {
            if linking.enforce_min_links {
                return Err(PipelineError::execution(self.ordinal(), message));
            }
            ctx.note(self.ordinal(), message);
        }

        Ok(StageOutput::Links {
            placements: result.links_added,
            body_html: result.html,
            shortfall,
        })
    }
}

pub struct AssembleSchema;

#[async_trait]
impl StageHandler for AssembleSchema {
    fn ordinal(&self) -> u8 {
        stages::ASSEMBLE_SCHEMA
    }
    fn name(&self) -> &'static str {
        "assemble_schema"
    }

    async fn run(
        &self,
        _ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let generated = generated_or_err(state, self.ordinal())?;
        let description = assembler::excerpt_from(&generated.body_html);
        let graph = schema::build_schema(SchemaInput {
            title: &state.title,
            keyword: &state.keyword,
            description: &description,
            word_count: assembler::count_words(&generated.body_html),
            url: state.target_url.as_deref(),
            published_at: Utc::now(),
            faq: &state.faq,
            video: state.video.as_ref(),
            references: &state.references,
        });
        Ok(StageOutput::Schema(graph))
    }
}

pub struct AssembleDocument;

#[async_trait]
impl StageHandler for AssembleDocument {
    fn ordinal(&self) -> u8 {
        stages::ASSEMBLE_DOCUMENT
    }
    fn name(&self) -> &'static str {
        "assemble_document"
    }

    async fn run(
        &self,
        _ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let generated = generated_or_err(state, self.ordinal())?;
        let document = assembler::assemble_document(AssembleInput {
            title: &state.title,
            body_html: &generated.body_html,
            faq: &state.faq,
            references: &state.references,
            schema: state.schema.as_ref(),
        });
        Ok(StageOutput::Document(document))
    }
}

pub struct ValidateQuality;

#[async_trait]
impl StageHandler for ValidateQuality {
    fn ordinal(&self) -> u8 {
        stages::VALIDATE_QUALITY
    }
    fn name(&self) -> &'static str {
        "validate_quality"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let document = state
            .final_document
            .as_ref()
            .ok_or_else(|| PipelineError::execution(self.ordinal(), "no assembled document"))?;
        ctx.services
            .validator
            .validate(document, &state.keyword)
            .await
            .map(StageOutput::Quality)
            .map_err(|e| PipelineError::execution(self.ordinal(), e))
    }
}

pub struct Publish;

#[async_trait]
impl StageHandler for Publish {
    fn ordinal(&self) -> u8 {
        stages::PUBLISH
    }
    fn name(&self) -> &'static str {
        "publish"
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StageOutput, PipelineError> {
        let document = state
            .final_document
            .as_ref()
            .ok_or_else(|| PipelineError::execution(self.ordinal(), "no assembled document"))?;

        if ctx.config.dry_run {
            debug!(slug = %document.slug, "dry run, skipping publish");
            ctx.note(self.ordinal(), "dry run, publish skipped");
            return Ok(StageOutput::Published(None));
        }

        let request = PublishRequest {
            title: document.title.clone(),
            html: document.html.clone(),
            slug: document.slug.clone(),
            excerpt: document.excerpt.clone(),
            status: ctx.config.publish_status,
            categories: ctx.config.categories.clone(),
            tags: ctx.config.tags.clone(),
            post_id: state.post_id,
        };
        let post = ctx
            .services
            .publisher
            .publish(&request)
            .await
            .map_err(|e| PipelineError::execution(self.ordinal(), e))?;
        Ok(StageOutput::Published(Some(post)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelObserver, PipelineEvent, SilentObserver};
    use crate::test_support::{Mock, generated_state};

    fn ctx<'a>(
        services: &'a Services,
        config: &'a PipelineConfig,
        cancel: &'a CancellationToken,
    ) -> StageContext<'a> {
        StageContext {
            services,
            config,
            cancel,
            observer: &SilentObserver,
        }
    }

    #[test]
    fn standard_registry_covers_every_stage() {
        let registry = StageRegistry::standard().unwrap();
        for def in &stages::STAGES {
            let handler = registry.get(def.ordinal).unwrap();
            assert_eq!(handler.name(), def.name);
        }
    }

    #[test]
    fn registry_rejects_gaps_and_duplicates() {
        let err = StageRegistry::from_handlers(vec![Arc::new(ValidateConfig)]).unwrap_err();
        assert!(err.to_string().contains("no handler registered"), "{err}");

        let mut handlers: Vec<Arc<dyn StageHandler>> = vec![Arc::new(ValidateConfig)];
        handlers.push(Arc::new(ValidateConfig));
        let err = StageRegistry::from_handlers(handlers).unwrap_err();
        assert!(err.to_string().contains("registered twice"), "{err}");
    }

    #[test]
    fn registry_rejects_misnamed_handler() {
        struct Impostor;

        #[async_trait]
        impl StageHandler for Impostor {
            fn ordinal(&self) -> u8 {
                3
            }
            fn name(&self) -> &'static str {
                "publish"
            }
            async fn run(
                &self,
                _ctx: &StageContext<'_>,
                _state: &PipelineState,
            ) -> Result<StageOutput, PipelineError> {
                Ok(StageOutput::ConfigValidated)
            }
        }

        let mut registry = StageRegistry::standard().unwrap();
        let err = registry.replace(Arc::new(Impostor)).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn validate_config_rejects_blank_keyword() {
        let (_mock, services) = Mock::default().into_services();
        let config = PipelineConfig::for_tests();
        let cancel = CancellationToken::new();
        let state = PipelineState::new("  ", "A Title");

        let err = ValidateConfig
            .run(&ctx(&services, &config, &cancel), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn video_requires_generated_content() {
        let (_mock, services) = Mock::default().into_services();
        let config = PipelineConfig::for_tests();
        let cancel = CancellationToken::new();
        let state = generated_state("");

        let err = InjectVideo
            .run(&ctx(&services, &config, &cancel), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DependencyNotReady { stage: 8, .. }));
    }

    #[tokio::test]
    async fn link_shortfall_is_a_warning_unless_enforced() {
        let (_mock, services) = Mock::default().into_services();
        let mut config = PipelineConfig::for_tests();
        let cancel = CancellationToken::new();
        let state = generated_state("Bread needs flour and water.");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let observer = ChannelObserver::new(tx);
        let noting = StageContext {
            services: &services,
            config: &config,
            cancel: &cancel,
            observer: &observer,
        };

        match InjectLinks.run(&noting, &state).await.unwrap() {
            StageOutput::Links {
                placements,
                shortfall,
                ..
            } => {
                assert!(placements.is_empty());
                assert!(shortfall.unwrap().starts_with("placed 0 of at least 1"));
            }
            other => panic!("unexpected output {other:?}"),
        }
        match rx.try_recv().unwrap() {
            PipelineEvent::Message { stage, text } => {
                assert_eq!(stage, 11);
                assert!(text.starts_with("placed 0 of at least 1"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        config.linking.enforce_min_links = true;
        let err = InjectLinks
            .run(&ctx(&services, &config, &cancel), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageExecution { stage: 11, .. }));
    }

    #[tokio::test]
    async fn publish_skips_remote_call_on_dry_run() {
        let (mock, services) = Mock::default().into_services();
        let mut config = PipelineConfig::for_tests();
        config.dry_run = true;
        let cancel = CancellationToken::new();

        let mut state = generated_state("Bread needs flour and water.");
        state.final_document = Some(assembler::assemble_document(AssembleInput {
            title: "Bread",
            body_html: "<p>Bread.</p>",
            faq: &[],
            references: &[],
            schema: None,
        }));

        let output = Publish
            .run(&ctx(&services, &config, &cancel), &state)
            .await
            .unwrap();
        assert_eq!(output, StageOutput::Published(None));
        assert_eq!(mock.calls_to("publish"), 0);
    }
}
