//! WordPress REST payload shapes and HTML-to-text conversion.

use chrono::{DateTime, NaiveDateTime, Utc};
use postforge_shared::{LinkCandidate, PriorArticle, PublishStatus};
use scraper::Html;
use serde::{Deserialize, Serialize};

/// Body of a create/update request to `/wp-json/wp/v2/posts`.
#[derive(Debug, Serialize)]
pub(crate) struct PostBody<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub status: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub slug: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub excerpt: &'a str,
    #[serde(skip_serializing_if = "<[u64]>::is_empty")]
    pub categories: &'a [u64],
    #[serde(skip_serializing_if = "<[u64]>::is_empty")]
    pub tags: &'a [u64],
}

/// A `{ "rendered": "..." }` field.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Rendered {
    #[serde(default)]
    pub rendered: String,
}

/// The subset of a WordPress post object Postforge reads.
#[derive(Debug, Deserialize)]
pub struct RemotePost {
    pub id: u64,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub(crate) title: Rendered,
    #[serde(default)]
    pub(crate) content: Rendered,
    #[serde(default)]
    pub(crate) excerpt: Rendered,
    #[serde(default)]
    pub(crate) date_gmt: Option<String>,
}

impl RemotePost {
    pub fn title_text(&self) -> String {
        html_to_text(&self.title.rendered)
    }

    pub fn content_text(&self) -> String {
        html_to_text(&self.content.rendered)
    }

    pub fn excerpt_text(&self) -> String {
        html_to_text(&self.excerpt.rendered)
    }

    /// Publication time; WordPress reports `date_gmt` without an offset.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.date_gmt.as_deref()?;
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn publish_status(&self) -> PublishStatus {
        self.status
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn to_link_candidate(&self) -> LinkCandidate {
        LinkCandidate {
            target_identifier: self.link.clone(),
            target_title: self.title_text(),
            target_text: self.content_text(),
        }
    }

    /// Convert to a prior article; the title doubles as the keyword since
    /// WordPress does not store one.
    pub fn to_prior_article(&self) -> PriorArticle {
        let title = self.title_text();
        PriorArticle {
            url: self.link.clone(),
            keyword: title.to_lowercase(),
            title,
            excerpt: self.excerpt_text(),
            published_at: self.published_at().unwrap_or_else(Utc::now),
        }
    }
}

/// Visible text of an HTML fragment with whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let raw: Vec<&str> = fragment.root_element().text().collect();
    raw.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_text_strips_markup_and_entities() {
        let text = html_to_text("<p>Salt &amp; <strong>pepper</strong></p>\n<p>Done.</p>");
        assert_eq!(text, "Salt & pepper Done.");
        assert_eq!(html_to_text(""), "");
    }

    #[test]
    fn remote_post_converts_to_candidate() {
        let post: RemotePost = serde_json::from_str(
            r#"{
                "id": 42,
                "link": "https://bakery.example/rye-bread/",
                "status": "publish",
                "date_gmt": "2024-03-01T09:30:00",
                "title": {"rendered": "Rye &amp; Spelt"},
                "content": {"rendered": "<p>Rye flour needs <em>time</em>.</p>"},
                "excerpt": {"rendered": "<p>Short rye intro.</p>"}
            }"#,
        )
        .unwrap();

        let candidate = post.to_link_candidate();
        assert_eq!(candidate.target_identifier, "https://bakery.example/rye-bread/");
        assert_eq!(candidate.target_title, "Rye & Spelt");
        assert_eq!(candidate.target_text, "Rye flour needs time .");
        assert_eq!(post.publish_status(), PublishStatus::Publish);

        let article = post.to_prior_article();
        assert_eq!(article.excerpt, "Short rye intro.");
        assert_eq!(article.published_at.to_rfc3339(), "2024-03-01T09:30:00+00:00");
    }

    #[test]
    fn missing_fields_default() {
        let post: RemotePost = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        assert_eq!(post.title_text(), "");
        assert!(post.published_at().is_none());
        assert_eq!(post.publish_status(), PublishStatus::Draft);
    }

    #[test]
    fn post_body_omits_empty_optionals() {
        let body = PostBody {
            title: "T",
            content: "<p>x</p>",
            status: "draft",
            slug: "",
            excerpt: "",
            categories: &[],
            tags: &[3],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("slug").is_none());
        assert!(json.get("categories").is_none());
        assert_eq!(json["tags"][0], 3);
    }
}
