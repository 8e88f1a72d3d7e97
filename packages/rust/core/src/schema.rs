//! schema.org JSON-LD graph for the article.
//!
//! Always emits an `Article`; adds `FAQPage` when FAQs exist and
//! `VideoObject` when a video was embedded.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use postforge_shared::{FaqItem, Reference, VideoEmbed};

/// Inputs for [`build_schema`].
#[derive(Debug, Clone, Copy)]
pub struct SchemaInput<'a> {
    pub title: &'a str,
    pub keyword: &'a str,
    pub description: &'a str,
    pub word_count: usize,
    pub url: Option<&'a str>,
    pub published_at: DateTime<Utc>,
    pub faq: &'a [FaqItem],
    pub video: Option<&'a VideoEmbed>,
    pub references: &'a [Reference],
}

/// Build the `@graph` document.
pub fn build_schema(input: SchemaInput<'_>) -> Value {
    let mut article = json!({
        "@type": "Article",
        "headline": input.title,
        "keywords": input.keyword,
        "wordCount": input.word_count,
        "datePublished": input.published_at.to_rfc3339(),
        "inLanguage": "en",
    });
    if !input.description.is_empty() {
        article["description"] = json!(input.description);
    }
    if let Some(url) = input.url {
        article["url"] = json!(url);
        article["mainEntityOfPage"] = json!({"@type": "WebPage", "@id": url});
    }
    if !input.references.is_empty() {
        article["citation"] = input
            .references
            .iter()
            .map(|r| json!({"@type": "CreativeWork", "name": r.title, "url": r.url}))
            .collect();
    }

    let mut graph = vec![article];

    if !input.faq.is_empty() {
        let questions: Vec<Value> = input
            .faq
            .iter()
            .map(|item| {
                json!({
                    "@type": "Question",
                    "name": item.question,
                    "acceptedAnswer": {"@type": "Answer", "text": item.answer},
                })
            })
            .collect();
        graph.push(json!({"@type": "FAQPage", "mainEntity": questions}));
    }

    if let Some(video) = input.video {
        let mut object = json!({
            "@type": "VideoObject",
            "name": video.title,
            "embedUrl": video.embed_url,
        });
        if let Some(thumb) = &video.thumbnail_url {
            object["thumbnailUrl"] = json!(thumb);
        }
        if let Some(date) = &video.upload_date {
            object["uploadDate"] = json!(date);
        }
        graph.push(object);
    }

    json!({
        "@context": "https://schema.org",
        "@graph": graph,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(faq: &'a [FaqItem], video: Option<&'a VideoEmbed>) -> SchemaInput<'a> {
        SchemaInput {
            title: "Rye Bread",
            keyword: "rye bread",
            description: "How to bake rye.",
            word_count: 900,
            url: None,
            published_at: Utc::now(),
            faq,
            video,
            references: &[],
        }
    }

    #[test]
    fn article_only_by_default() {
        let schema = build_schema(input(&[], None));
        assert_eq!(schema["@context"], "https://schema.org");
        let graph = schema["@graph"].as_array().unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph[0]["@type"], "Article");
        assert_eq!(graph[0]["wordCount"], 900);
        assert!(graph[0].get("url").is_none());
    }

    #[test]
    fn faq_and_video_add_nodes() {
        let faq = vec![FaqItem {
            question: "Does rye rise?".into(),
            answer: "Slowly.".into(),
        }];
        let video = VideoEmbed {
            embed_url: "https://www.youtube.com/embed/x".into(),
            title: "Rye demo".into(),
            thumbnail_url: Some("https://img.example/x.jpg".into()),
            upload_date: None,
        };
        let schema = build_schema(input(&faq, Some(&video)));
        let graph = schema["@graph"].as_array().unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph[1]["mainEntity"][0]["acceptedAnswer"]["text"], "Slowly.");
        assert_eq!(graph[2]["thumbnailUrl"], "https://img.example/x.jpg");
        assert!(graph[2].get("uploadDate").is_none());
    }

    #[test]
    fn url_and_citations_when_known() {
        let refs = vec![Reference {
            url: "https://example.org/study".into(),
            title: "Study".into(),
            publisher: None,
        }];
        let schema = build_schema(SchemaInput {
            url: Some("https://bakery.example/rye/"),
            references: &refs,
            ..input(&[], None)
        });
        let article = &schema["@graph"][0];
        assert_eq!(article["mainEntityOfPage"]["@id"], "https://bakery.example/rye/");
        assert_eq!(article["citation"][0]["name"], "Study");
    }
}
