//! Rule-based quality checks on the assembled article.
//!
//! Each rule either passes or deducts its penalty from a starting score of
//! 100. Critical rules are counted separately so callers can tell a weak
//! article from a broken one.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use postforge_shared::{FinalDocument, QaReport, QaRuleOutcome, QualityConfig, Result};

use crate::assembler;
use crate::collaborators::QualityValidator;

/// Acceptable title length, in characters.
const TITLE_LEN: (usize, usize) = (10, 70);

struct Rule {
    name: &'static str,
    critical: bool,
    penalty: f64,
}

const SINGLE_H1: Rule = Rule { name: "single_h1", critical: true, penalty: 20.0 };
const KEYWORD_IN_H1: Rule = Rule { name: "keyword_in_h1", critical: false, penalty: 10.0 };
const MIN_WORD_COUNT: Rule = Rule { name: "min_word_count", critical: true, penalty: 20.0 };
const MIN_SECTIONS: Rule = Rule { name: "min_sections", critical: false, penalty: 10.0 };
const INTERNAL_LINKS: Rule = Rule { name: "internal_links", critical: false, penalty: 10.0 };
const IMAGE_ALT: Rule = Rule { name: "image_alt", critical: false, penalty: 5.0 };
const SCHEMA_VALID: Rule = Rule { name: "schema_valid", critical: false, penalty: 10.0 };
const NO_EMPTY_PARAGRAPHS: Rule = Rule { name: "no_empty_paragraphs", critical: false, penalty: 5.0 };
const TITLE_LENGTH: Rule = Rule { name: "title_length", critical: false, penalty: 5.0 };

/// Validates HTML structure against [`QualityConfig`] thresholds.
#[derive(Debug, Clone)]
pub struct RuleValidator {
    config: QualityConfig,
    /// Host of the publishing site, for recognizing internal links.
    site_host: Option<String>,
}

impl RuleValidator {
    pub fn new(config: QualityConfig, site_url: Option<&str>) -> Self {
        let site_host = site_url
            .and_then(|u| Url::parse(u).ok())
            .and_then(|u| u.host_str().map(str::to_lowercase));
        Self { config, site_host }
    }

    /// Run every rule against `document`.
    pub fn check(&self, document: &FinalDocument, keyword: &str) -> QaReport {
        let html = Html::parse_fragment(&document.html);
        let mut outcomes = Vec::new();

        let h1s: Vec<ElementRef<'_>> = select(&html, "h1").collect();
        outcomes.push(outcome(
            &SINGLE_H1,
            h1s.len() == 1,
            format!("found {} h1 element(s)", h1s.len()),
        ));

        let h1_text = h1s
            .first()
            .map(|h| h.text().collect::<String>().to_lowercase())
            .unwrap_or_default();
        let keyword_lower = keyword.trim().to_lowercase();
        outcomes.push(outcome(
            &KEYWORD_IN_H1,
            !keyword_lower.is_empty() && h1_text.contains(&keyword_lower),
            format!("keyword '{keyword}' in h1"),
        ));

        let words = assembler::count_words(&document.html);
        outcomes.push(outcome(
            &MIN_WORD_COUNT,
            words >= self.config.min_word_count,
            format!("{words} words (minimum {})", self.config.min_word_count),
        ));

        let sections = select(&html, "h2").count();
        outcomes.push(outcome(
            &MIN_SECTIONS,
            sections >= self.config.min_sections,
            format!("{sections} sections (minimum {})", self.config.min_sections),
        ));

        let internal = select(&html, "a[href]")
            .filter(|a| self.is_internal(a))
            .count();
        outcomes.push(outcome(
            &INTERNAL_LINKS,
            internal >= self.config.min_internal_links,
            format!(
                "{internal} internal link(s) (minimum {})",
                self.config.min_internal_links
            ),
        ));

        let missing_alt = select(&html, "img")
            .filter(|img| img.value().attr("alt").is_none_or(|alt| alt.trim().is_empty()))
            .count();
        outcomes.push(outcome(
            &IMAGE_ALT,
            missing_alt == 0,
            format!("{missing_alt} image(s) without alt text"),
        ));

        let (schema_ok, schema_msg) = match &document.schema_json {
            None => (false, "no structured data".to_string()),
            Some(json) => match serde_json::from_str::<serde_json::Value>(json) {
                Ok(value) if value.get("@context").is_some() => {
                    (true, "structured data is valid JSON-LD".to_string())
                }
                Ok(_) => (false, "structured data has no @context".to_string()),
                Err(e) => (false, format!("structured data is not JSON: {e}")),
            },
        };
        outcomes.push(outcome(&SCHEMA_VALID, schema_ok, schema_msg));

        let empty_paragraphs = select(&html, "p")
            .filter(|p| {
                p.text().all(|t| t.trim().is_empty()) && p.children().all(|c| !c.value().is_element())
            })
            .count();
        outcomes.push(outcome(
            &NO_EMPTY_PARAGRAPHS,
            empty_paragraphs == 0,
            format!("{empty_paragraphs} empty paragraph(s)"),
        ));

        let title_len = document.title.trim().chars().count();
        outcomes.push(outcome(
            &TITLE_LENGTH,
            (TITLE_LEN.0..=TITLE_LEN.1).contains(&title_len),
            format!(
                "title is {title_len} characters (range {}-{})",
                TITLE_LEN.0, TITLE_LEN.1
            ),
        ));

        let penalty: f64 = outcomes
            .iter()
            .zip(RULES)
            .filter(|(o, _)| !o.passed)
            .map(|(_, rule)| rule.penalty)
            .sum();
        let critical_failures = outcomes.iter().filter(|o| o.critical && !o.passed).count();
        let score = (100.0 - penalty).max(0.0);

        debug!(score, critical_failures, "quality check complete");
        QaReport {
            score,
            critical_failures,
            rules: outcomes,
        }
    }

    fn is_internal(&self, anchor: &ElementRef<'_>) -> bool {
        let el = anchor.value();
        if el.classes().any(|c| c == "related-link") {
            return true;
        }
        let (Some(host), Some(href)) = (&self.site_host, el.attr("href")) else {
            return false;
        };
        Url::parse(href)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(host)))
            .unwrap_or(false)
    }
}

/// Rules in the order [`RuleValidator::check`] emits them.
const RULES: [&Rule; 9] = [
    &SINGLE_H1,
    &KEYWORD_IN_H1,
    &MIN_WORD_COUNT,
    &MIN_SECTIONS,
    &INTERNAL_LINKS,
    &IMAGE_ALT,
    &SCHEMA_VALID,
    &NO_EMPTY_PARAGRAPHS,
    &TITLE_LENGTH,
];

fn outcome(rule: &Rule, passed: bool, message: String) -> QaRuleOutcome {
    QaRuleOutcome {
        rule: rule.name.to_string(),
        passed,
        critical: rule.critical,
        message,
    }
}

fn select<'a>(html: &'a Html, css: &str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    let selector = Selector::parse(css).ok();
    selector
        .into_iter()
        .flat_map(move |sel| html.select(&sel).collect::<Vec<_>>())
}

#[async_trait]
impl QualityValidator for RuleValidator {
    async fn validate(&self, document: &FinalDocument, keyword: &str) -> Result<QaReport> {
        Ok(self.check(document, keyword))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> QualityConfig {
        QualityConfig {
            min_word_count: 20,
            min_sections: 2,
            min_internal_links: 1,
        }
    }

    fn good_html() -> String {
        let para = "Rye bread rewards patience with deep flavour and a tight crumb that keeps for days.";
        format!(
            "<h1>Rye Bread Basics</h1>\
             <h2>Flour</h2><p>{para} See (<a href=\"https://bakery.example/spelt/\" class=\"related-link\">spelt</a>).</p>\
             <h2>Baking</h2><p>{para}</p>\
             <img src=\"loaf.jpg\" alt=\"A rye loaf\">"
        )
    }

    fn document(html: String, schema: Option<&str>) -> FinalDocument {
        FinalDocument {
            title: "Rye Bread Basics".into(),
            slug: "rye-bread-basics".into(),
            html,
            excerpt: String::new(),
            word_count: 0,
            schema_json: schema.map(str::to_string),
        }
    }

    #[test]
    fn good_document_scores_full_marks() {
        let validator = RuleValidator::new(config(), Some("https://bakery.example"));
        let doc = document(good_html(), Some(r#"{"@context":"https://schema.org"}"#));
        let report = validator.check(&doc, "rye bread");
        let failed: Vec<_> = report.rules.iter().filter(|r| !r.passed).collect();
        assert!(failed.is_empty(), "{failed:?}");
        assert_eq!(report.score, 100.0);
        assert_eq!(report.critical_failures, 0);
        assert_eq!(report.rules.len(), RULES.len());
    }

    #[test]
    fn structural_problems_are_penalised() {
        let validator = RuleValidator::new(config(), None);
        let html = "<h1>One</h1><h1>Two</h1><p> </p><img src=\"x.png\">".to_string();
        let mut doc = document(html, Some("not json"));
        doc.title = "Short".into();
        let report = validator.check(&doc, "rye bread");

        let failed: Vec<&str> = report
            .rules
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.rule.as_str())
            .collect();
        for rule in [
            "single_h1",
            "keyword_in_h1",
            "min_word_count",
            "min_sections",
            "internal_links",
            "image_alt",
            "schema_valid",
            "no_empty_paragraphs",
            "title_length",
        ] {
            assert!(failed.contains(&rule), "{rule} should fail");
        }
        assert_eq!(report.critical_failures, 2);
        assert_eq!(report.score, 5.0);
    }

    #[test]
    fn internal_links_match_site_host() {
        let validator = RuleValidator::new(config(), Some("https://Bakery.example/blog"));
        let html = "<h1>x</h1><p><a href=\"https://bakery.example/a\">a</a> <a href=\"https://other.example\">b</a></p>";
        let report = validator.check(&document(html.into(), None), "x");
        let rule = report.rules.iter().find(|r| r.rule == "internal_links").unwrap();
        assert!(rule.passed, "{}", rule.message);
    }

    #[test]
    fn missing_schema_fails_softly() {
        let validator = RuleValidator::new(config(), None);
        let report = validator.check(&document(good_html(), None), "rye bread");
        let rule = report.rules.iter().find(|r| r.rule == "schema_valid").unwrap();
        assert!(!rule.passed);
        assert!(!rule.critical);
        assert_eq!(report.score, 90.0);
    }
}
