//! WordPress REST client: post publication and link-target discovery.
//!
//! Posts are created with `POST /wp-json/wp/v2/posts` or updated with
//! `POST /wp-json/wp/v2/posts/{id}`, authenticated with an application
//! password over HTTP basic auth. Published posts double as internal link
//! targets and as prior content for gap analysis.

mod wire;

use std::time::Duration;

use postforge_shared::{
    LinkCandidate, PostforgeError, PriorArticle, PublishStatus, PublishedPost, Result,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use wire::{RemotePost, html_to_text};

/// Default timeout in seconds for REST requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// WordPress caps `per_page` at 100.
const MAX_PER_PAGE: u32 = 100;

/// Error bodies are truncated to this many characters.
const MAX_ERROR_BODY: usize = 500;

/// User-Agent string for REST requests.
const USER_AGENT: &str = concat!("Postforge/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structured publication failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    #[error("unauthorized: check the username and application password")]
    Unauthorized,

    #[error("forbidden: the user may not publish posts")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<PublishError> for PostforgeError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::Network(msg) => PostforgeError::Network(msg),
            other => PostforgeError::Publish(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Everything needed to create or update one post.
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub title: String,
    pub html: String,
    pub slug: String,
    pub excerpt: String,
    pub status: PublishStatus,
    pub categories: Vec<u64>,
    pub tags: Vec<u64>,
    /// Update this post instead of creating a new one.
    pub post_id: Option<u64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for one WordPress site. Reads work without credentials; publishing
/// needs a username and application password.
#[derive(Debug, Clone)]
pub struct WordPressClient {
    client: Client,
    base: Url,
    /// `(username, application password)`.
    credentials: Option<(String, String)>,
}

impl WordPressClient {
    /// Build an authenticated client for the site at `base_url`.
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Self::build(base_url, Some((username.into(), password.into())), timeout)
    }

    /// Build a read-only client; [`Self::publish`] fails with
    /// [`PublishError::Unauthorized`] without contacting the site.
    pub fn anonymous(base_url: &str, timeout: Duration) -> Result<Self> {
        Self::build(base_url, None, timeout)
    }

    fn build(
        base_url: &str,
        credentials: Option<(String, String)>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| {
            PostforgeError::config(format!("invalid site base_url '{base_url}': {e}"))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(PostforgeError::config(format!(
                "site base_url must be http(s): {base_url}"
            )));
        }
        // Keep a trailing slash so joins stay under any sub-path install.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| PostforgeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            credentials,
        })
    }

    /// Site root this client talks to.
    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, PublishError> {
        self.base
            .join(path)
            .map_err(|e| PublishError::InvalidResponse(format!("bad endpoint {path}: {e}")))
    }

    /// Create or update a post.
    #[instrument(skip_all, fields(title = %request.title, update = request.post_id.is_some()))]
    pub async fn publish(
        &self,
        request: &PublishRequest,
    ) -> std::result::Result<PublishedPost, PublishError> {
        if self.credentials.is_none() {
            return Err(PublishError::Unauthorized);
        }
        let path = match request.post_id {
            Some(id) => format!("wp-json/wp/v2/posts/{id}"),
            None => "wp-json/wp/v2/posts".to_string(),
        };
        let url = self.endpoint(&path)?;

        let body = wire::PostBody {
            title: &request.title,
            content: &request.html,
            status: request.status.as_str(),
            slug: &request.slug,
            excerpt: &request.excerpt,
            categories: &request.categories,
            tags: &request.tags,
        };

        debug!(%url, "sending post");
        let response = self
            .authorize(self.client.post(url.clone()))
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Network(format!("{url}: {e}")))?;

        let response = check_status(response, &url).await?;
        let post: RemotePost = response
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(format!("{url}: {e}")))?;

        info!(id = post.id, link = %post.link, "post published");
        Ok(PublishedPost {
            id: post.id,
            status: post.publish_status(),
            url: post.link,
        })
    }

    /// Fetch up to `limit` published posts, newest first.
    #[instrument(skip_all, fields(limit = limit))]
    pub async fn fetch_posts(&self, limit: u32) -> Result<Vec<RemotePost>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut url = self.endpoint("wp-json/wp/v2/posts")?;
        url.query_pairs_mut()
            .append_pair("per_page", &limit.min(MAX_PER_PAGE).to_string())
            .append_pair("status", "publish");

        let response = self
            .authorize(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|e| PostforgeError::Network(format!("{url}: {e}")))?;

        let response = check_status(response, &url).await?;
        let posts: Vec<RemotePost> = response
            .json()
            .await
            .map_err(|e| PostforgeError::parse(format!("{url}: {e}")))?;

        debug!(count = posts.len(), "fetched posts");
        Ok(posts)
    }

    /// Published posts as internal link candidates. Posts without a link are
    /// skipped.
    pub async fn fetch_targets(&self, limit: u32) -> Result<Vec<LinkCandidate>> {
        let posts = self.fetch_posts(limit).await?;
        let candidates: Vec<LinkCandidate> = posts
            .iter()
            .filter(|p| !p.link.is_empty())
            .map(RemotePost::to_link_candidate)
            .collect();
        if candidates.len() < posts.len() {
            warn!(
                skipped = posts.len() - candidates.len(),
                "posts without a link were skipped"
            );
        }
        Ok(candidates)
    }

    /// Published posts as prior articles for gap analysis.
    pub async fn fetch_prior_articles(&self, limit: u32) -> Result<Vec<PriorArticle>> {
        let posts = self.fetch_posts(limit).await?;
        Ok(posts
            .iter()
            .filter(|p| !p.link.is_empty())
            .map(RemotePost::to_prior_article)
            .collect())
    }
}

/// Map non-success statuses to [`PublishError`].
async fn check_status(
    response: reqwest::Response,
    url: &Url,
) -> std::result::Result<reqwest::Response, PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(match status {
        StatusCode::UNAUTHORIZED => PublishError::Unauthorized,
        StatusCode::FORBIDDEN => PublishError::Forbidden,
        StatusCode::NOT_FOUND => PublishError::NotFound(url.to_string()),
        other => {
            let body = response.text().await.unwrap_or_default();
            PublishError::Http {
                status: other.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            }
        }
    })
}
