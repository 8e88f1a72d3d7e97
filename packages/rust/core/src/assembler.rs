//! Article HTML assembly.
//!
//! Renders the generated document to body HTML, splices in the video embed,
//! and assembles the final publishable document with FAQ, references and
//! structured data. [`write_output`] persists the result to disk.

use std::path::{Path, PathBuf};

use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use postforge_shared::{
    FaqItem, FinalDocument, GeneratedDocument, PostforgeError, Reference, Result, VideoEmbed,
};

/// Longest excerpt, in characters.
const EXCERPT_MAX_CHARS: usize = 160;

/// Longest slug, in characters.
const SLUG_MAX_CHARS: usize = 80;

/// Inputs for [`assemble_document`].
#[derive(Debug, Clone, Copy)]
pub struct AssembleInput<'a> {
    pub title: &'a str,
    pub body_html: &'a str,
    pub faq: &'a [FaqItem],
    pub references: &'a [Reference],
    pub schema: Option<&'a serde_json::Value>,
}

/// A file written by [`write_output`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: usize,
}

/// Escape text for use in element content or a double-quoted attribute.
pub(crate) fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Render the structured document as body HTML: one `<h1>`, an `<h2>` per
/// section, a `<p>` per paragraph. Blank sections and paragraphs are dropped.
pub fn render_body(document: &GeneratedDocument, fallback_title: &str) -> String {
    let title = if document.title.trim().is_empty() {
        fallback_title
    } else {
        document.title.trim()
    };

    let mut html = format!("<h1>{}</h1>\n", escape_html(title));
    for section in &document.sections {
        let paragraphs: Vec<&str> = section
            .paragraphs
            .iter()
            .map(|p| p.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if paragraphs.is_empty() {
            continue;
        }
        if !section.heading.trim().is_empty() {
            html.push_str(&format!("<h2>{}</h2>\n", escape_html(section.heading.trim())));
        }
        for text in paragraphs {
            html.push_str(&format!("<p>{}</p>\n", escape_html(text)));
        }
    }
    html
}

/// Markup for an embedded video.
pub fn video_markup(video: &VideoEmbed) -> String {
    let title = escape_html(&video.title);
    format!(
        "<figure class=\"video-embed\"><iframe src=\"{}\" title=\"{title}\" loading=\"lazy\" allowfullscreen></iframe><figcaption>{title}</figcaption></figure>\n",
        escape_html(&video.embed_url),
    )
}

/// Place the video just before the second section heading, so it follows
/// the first section. Short bodies get it appended.
pub fn insert_video(body_html: &str, video: &VideoEmbed) -> String {
    let markup = video_markup(video);
    let second_heading = body_html
        .match_indices("<h2")
        .nth(1)
        .map(|(idx, _)| idx);

    match second_heading {
        Some(idx) => {
            let mut out = String::with_capacity(body_html.len() + markup.len());
            out.push_str(&body_html[..idx]);
            out.push_str(&markup);
            out.push_str(&body_html[idx..]);
            out
        }
        None => format!("{body_html}{markup}"),
    }
}

/// Assemble the final publishable document.
#[instrument(skip_all, fields(title = %input.title))]
pub fn assemble_document(input: AssembleInput<'_>) -> FinalDocument {
    let mut html = input.body_html.to_string();

    if !input.faq.is_empty() {
        html.push_str("<section class=\"faq\">\n<h2>Frequently Asked Questions</h2>\n");
        for item in input.faq {
            html.push_str(&format!(
                "<h3>{}</h3>\n<p>{}</p>\n",
                escape_html(&item.question),
                escape_html(&item.answer)
            ));
        }
        html.push_str("</section>\n");
    }

    if !input.references.is_empty() {
        html.push_str("<section class=\"references\">\n<h2>References</h2>\n<ul>\n");
        for reference in input.references {
            let publisher = reference
                .publisher
                .as_deref()
                .map(|p| format!(" ({})", escape_html(p)))
                .unwrap_or_default();
            html.push_str(&format!(
                "<li><a href=\"{}\" rel=\"nofollow noopener\" target=\"_blank\">{}</a>{publisher}</li>\n",
                escape_html(&reference.url),
                escape_html(&reference.title),
            ));
        }
        html.push_str("</ul>\n</section>\n");
    }

    let word_count = count_words(&html);
    let excerpt = excerpt_from(&html);

    let schema_json = input.schema.map(|graph| graph.to_string());
    if let Some(json) = &schema_json {
        // A literal "</" would close the script element early.
        html.push_str(&format!(
            "<script type=\"application/ld+json\">{}</script>\n",
            json.replace("</", "<\\/")
        ));
    }

    debug!(word_count, bytes = html.len(), "document assembled");
    FinalDocument {
        title: input.title.to_string(),
        slug: slugify(input.title),
        html,
        excerpt,
        word_count,
        schema_json,
    }
}

/// Lowercase ASCII slug; runs of other characters collapse to one hyphen.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    if slug.len() > SLUG_MAX_CHARS {
        slug.truncate(SLUG_MAX_CHARS);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}

/// Visible words in HTML, ignoring script and style content.
pub fn count_words(html: &str) -> usize {
    visible_text(html).split_whitespace().count()
}

/// Text of the first non-empty paragraph, cut at a word boundary.
pub fn excerpt_from(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let Ok(p_sel) = Selector::parse("p") else {
        return String::new();
    };
    let first = doc
        .select(&p_sel)
        .map(|p| p.text().collect::<String>())
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
        .unwrap_or_default();

    if first.chars().count() <= EXCERPT_MAX_CHARS {
        return first;
    }
    let mut cut = String::new();
    for word in first.split_whitespace() {
        if cut.chars().count() + word.chars().count() + 1 > EXCERPT_MAX_CHARS - 3 {
            break;
        }
        if !cut.is_empty() {
            cut.push(' ');
        }
        cut.push_str(word);
    }
    format!("{cut}...")
}

fn visible_text(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let mut parts = Vec::new();
    for node in doc.root_element().descendants() {
        if let Some(text) = node.value().as_text() {
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element())
                .is_some_and(|el| matches!(el.name(), "script" | "style"));
            if !hidden {
                parts.push(&**text);
            }
        }
    }
    parts.join(" ")
}

/// Write `<slug>.html` and `<slug>.json` into `dir` atomically (write to a
/// temp file, then rename).
#[instrument(skip_all, fields(dir = %dir.display(), slug = %document.slug))]
pub fn write_output(dir: &Path, document: &FinalDocument) -> Result<Vec<OutputFile>> {
    std::fs::create_dir_all(dir).map_err(|e| PostforgeError::io(dir, e))?;

    let stem = if document.slug.is_empty() {
        "article"
    } else {
        document.slug.as_str()
    };
    let json = serde_json::to_string_pretty(document)
        .map_err(|e| PostforgeError::validation(format!("JSON serialization failed: {e}")))?;

    let mut written = Vec::with_capacity(2);
    for (filename, content) in [
        (format!("{stem}.html"), document.html.as_str()),
        (format!("{stem}.json"), json.as_str()),
    ] {
        let target = dir.join(&filename);
        let temp = dir.join(format!(".{filename}.tmp"));

        std::fs::write(&temp, content).map_err(|e| PostforgeError::io(&temp, e))?;
        std::fs::rename(&temp, &target).map_err(|e| PostforgeError::io(&target, e))?;

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        written.push(OutputFile {
            path: target,
            sha256: format!("{:x}", hasher.finalize()),
            size_bytes: content.len(),
        });
    }

    info!(files = written.len(), "article written");
    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use postforge_shared::{DocumentSection, Paragraph};

    fn doc() -> GeneratedDocument {
        GeneratedDocument {
            title: "Rye & Spelt Loaves".into(),
            sections: vec![
                DocumentSection {
                    heading: "Choosing Flour".into(),
                    paragraphs: vec![
                        Paragraph {
                            text: "Rye flour absorbs more water than wheat.".into(),
                            anchor_candidates: vec![],
                        },
                        Paragraph {
                            text: "   ".into(),
                            anchor_candidates: vec![],
                        },
                    ],
                },
                DocumentSection {
                    heading: "Empty".into(),
                    paragraphs: vec![],
                },
                DocumentSection {
                    heading: "Baking".into(),
                    paragraphs: vec![Paragraph {
                        text: "Bake at <250C> for an hour.".into(),
                        anchor_candidates: vec![],
                    }],
                },
            ],
        }
    }

    fn video() -> VideoEmbed {
        VideoEmbed {
            embed_url: "https://www.youtube.com/embed/abc".into(),
            title: "Shaping rye".into(),
            thumbnail_url: None,
            upload_date: None,
        }
    }

    #[test]
    fn render_body_escapes_and_skips_blanks() {
        let html = render_body(&doc(), "unused");
        assert!(html.starts_with("<h1>Rye &amp; Spelt Loaves</h1>"));
        assert_eq!(html.matches("<h2>").count(), 2);
        assert_eq!(html.matches("<p>").count(), 2);
        assert!(html.contains("&lt;250C&gt;"));
        assert!(!html.contains("Empty"));
    }

    #[test]
    fn render_body_falls_back_to_title() {
        let mut d = doc();
        d.title = " ".into();
        assert!(render_body(&d, "Fallback").starts_with("<h1>Fallback</h1>"));
    }

    #[test]
    fn video_goes_before_second_section() {
        let body = render_body(&doc(), "t");
        let with_video = insert_video(&body, &video());
        let video_at = with_video.find("video-embed").unwrap();
        let baking_at = with_video.find("<h2>Baking").unwrap();
        let flour_at = with_video.find("<h2>Choosing").unwrap();
        assert!(flour_at < video_at && video_at < baking_at);

        let short = insert_video("<p>Only text.</p>", &video());
        assert!(short.ends_with("</figure>\n"));
    }

    #[test]
    fn assemble_adds_faq_references_and_schema() {
        let body = render_body(&doc(), "t");
        let faq = vec![FaqItem {
            question: "Is rye gluten free?".into(),
            answer: "No.".into(),
        }];
        let refs = vec![Reference {
            url: "https://example.org/rye".into(),
            title: "Rye Study".into(),
            publisher: Some("Grain Council".into()),
        }];
        let schema = serde_json::json!({"@context": "https://schema.org", "note": "</script>"});
        let final_doc = assemble_document(AssembleInput {
            title: "Rye & Spelt Loaves",
            body_html: &body,
            faq: &faq,
            references: &refs,
            schema: Some(&schema),
        });

        assert_eq!(final_doc.slug, "rye-spelt-loaves");
        assert!(final_doc.html.contains("Frequently Asked Questions"));
        assert!(final_doc.html.contains("rel=\"nofollow noopener\""));
        assert!(final_doc.html.contains("(Grain Council)"));
        assert_eq!(final_doc.html.matches("</script>").count(), 1);
        assert!(final_doc.schema_json.as_deref().unwrap().contains("schema.org"));
        assert_eq!(final_doc.excerpt, "Rye flour absorbs more water than wheat.");
    }

    #[test]
    fn word_count_ignores_script() {
        let html = "<p>one two</p><script>var a = 1;</script><p>three</p>";
        assert_eq!(count_words(html), 3);
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("  Hello, World!  2024 "), "hello-world-2024");
        assert_eq!(slugify("Crème brûlée"), "cr-me-br-l-e");
        assert_eq!(slugify("!!!"), "");
        assert!(slugify(&"word ".repeat(40)).len() <= SLUG_MAX_CHARS);
        assert!(!slugify(&"word ".repeat(40)).ends_with('-'));
    }

    #[test]
    fn excerpt_truncates_on_word_boundary() {
        let long = format!("<p>{}</p>", "sourdough ".repeat(40));
        let excerpt = excerpt_from(&long);
        assert!(excerpt.ends_with("..."));
        assert!(excerpt.chars().count() <= EXCERPT_MAX_CHARS);
        assert!(!excerpt.contains("sourdo..."));
    }

    #[test]
    fn write_output_leaves_no_temp_files() {
        let dir = std::env::temp_dir().join(format!("pf_out_{}", uuid::Uuid::now_v7()));
        let final_doc = assemble_document(AssembleInput {
            title: "Rye Bread",
            body_html: "<h1>Rye Bread</h1><p>Text.</p>",
            faq: &[],
            references: &[],
            schema: None,
        });

        let files = write_output(&dir, &final_doc).unwrap();
        assert_eq!(files.len(), 2);
        assert!(dir.join("rye-bread.html").exists());
        assert!(dir.join("rye-bread.json").exists());
        for entry in std::fs::read_dir(&dir).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.starts_with('.'), "temp file left behind: {name}");
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
