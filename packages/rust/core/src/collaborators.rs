//! Black-box collaborators the stages call out to.
//!
//! Each trait is object-safe and async so implementations can be swapped
//! behind `Arc<dyn …>`: the generation bridge, the WordPress client, the
//! local store, or test doubles.

use std::sync::Arc;

use async_trait::async_trait;

use postforge_publisher::{PublishError, PublishRequest, WordPressClient};
use postforge_shared::{
    CompetitorAnalysis, FaqItem, FinalDocument, GapAnalysis, GeneratedDocument,
    GenerationRequest, LinkCandidate, Outline, PriorArticle, PublishedPost, QaReport, Reference,
    Result, VideoEmbed,
};
use postforge_storage::Storage;

#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze_gaps(&self, keyword: &str, prior: &[PriorArticle]) -> Result<GapAnalysis>;
    async fn analyze_competitors(&self, keyword: &str) -> Result<CompetitorAnalysis>;
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn build_outline(
        &self,
        keyword: &str,
        title: &str,
        gaps: Option<&GapAnalysis>,
        competitors: Option<&CompetitorAnalysis>,
    ) -> Result<Outline>;

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedDocument>;

    async fn generate_faq(&self, keyword: &str, document: &GeneratedDocument)
    -> Result<Vec<FaqItem>>;
}

#[async_trait]
pub trait MediaFinder: Send + Sync {
    async fn find_video(&self, keyword: &str) -> Result<Option<VideoEmbed>>;
}

#[async_trait]
pub trait ReferenceFinder: Send + Sync {
    async fn find_references(
        &self,
        keyword: &str,
        document: &GeneratedDocument,
    ) -> Result<Vec<Reference>>;
}

#[async_trait]
pub trait TargetDiscovery: Send + Sync {
    async fn discover_targets(&self, site: &str, limit: u32) -> Result<Vec<LinkCandidate>>;
}

#[async_trait]
pub trait PriorContentSource: Send + Sync {
    async fn recent_articles(&self, site: &str, limit: u32) -> Result<Vec<PriorArticle>>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        request: &PublishRequest,
    ) -> std::result::Result<PublishedPost, PublishError>;
}

#[async_trait]
pub trait QualityValidator: Send + Sync {
    async fn validate(&self, document: &FinalDocument, keyword: &str) -> Result<QaReport>;
}

/// The full set of collaborators a pipeline runs against.
#[derive(Clone)]
pub struct Services {
    pub analyzer: Arc<dyn ContentAnalyzer>,
    pub generator: Arc<dyn ContentGenerator>,
    pub media: Arc<dyn MediaFinder>,
    pub references: Arc<dyn ReferenceFinder>,
    pub discovery: Arc<dyn TargetDiscovery>,
    pub prior: Arc<dyn PriorContentSource>,
    pub publisher: Arc<dyn Publisher>,
    pub validator: Arc<dyn QualityValidator>,
}

// ---------------------------------------------------------------------------
// Adapters for the workspace's concrete clients
// ---------------------------------------------------------------------------

/// The client is bound to one site, so `site` is only used for logging.
#[async_trait]
impl TargetDiscovery for WordPressClient {
    async fn discover_targets(&self, site: &str, limit: u32) -> Result<Vec<LinkCandidate>> {
        tracing::debug!(site, base = self.base_url(), "discovering link targets");
        self.fetch_targets(limit).await
    }
}

#[async_trait]
impl PriorContentSource for WordPressClient {
    async fn recent_articles(&self, _site: &str, limit: u32) -> Result<Vec<PriorArticle>> {
        self.fetch_prior_articles(limit).await
    }
}

#[async_trait]
impl Publisher for WordPressClient {
    async fn publish(
        &self,
        request: &PublishRequest,
    ) -> std::result::Result<PublishedPost, PublishError> {
        WordPressClient::publish(self, request).await
    }
}

#[async_trait]
impl PriorContentSource for Storage {
    async fn recent_articles(&self, site: &str, limit: u32) -> Result<Vec<PriorArticle>> {
        Storage::recent_articles(self, site, limit).await
    }
}
