//! URL classification: assigns a [`Role`] to every URL the pipeline sees.
//!
//! Classification is a pure, total function of URL shape and content type.
//! It is implemented as a prioritized rule list: first matching rule wins,
//! and anything unmatched is `Irrelevant` — never an error. Rules are kept
//! most-specific-first so that adding a broader rule below an existing one
//! cannot change the classification of URLs the earlier rule already claims.

use regex::Regex;
use tracing::debug;
use url::Url;

use regraph_shared::{ClassifyRuleConfig, RegraphError, Result, Role, canonical_url};

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// A compiled classification rule.
struct CompiledRule {
    name: String,
    role: Role,
    url_pattern: Option<Regex>,
    content_type: Option<String>,
}

impl CompiledRule {
    /// A rule matches when every predicate it declares matches. A rule with
    /// no predicates matches everything (usable as an explicit default).
    fn matches(&self, url: &str, content_type: &str) -> bool {
        if let Some(re) = &self.url_pattern {
            if !re.is_match(url) {
                return false;
            }
        }
        if let Some(prefix) = &self.content_type {
            if !content_type.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Prioritized URL classifier.
pub struct Classifier {
    rules: Vec<CompiledRule>,
}

impl Classifier {
    /// Compile a classifier from configured rules. An empty rule list gets
    /// the built-in defaults.
    pub fn from_config(rules: &[ClassifyRuleConfig]) -> Result<Self> {
        if rules.is_empty() {
            return Self::from_config(&default_rules());
        }

        let compiled = rules
            .iter()
            .map(|rule| {
                let url_pattern = rule
                    .url_pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| {
                        RegraphError::config(format!(
                            "classifier rule {}: invalid regex: {e}",
                            rule.name
                        ))
                    })?;
                Ok(CompiledRule {
                    name: rule.name.clone(),
                    role: rule.role,
                    url_pattern,
                    content_type: rule.content_type.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules: compiled })
    }

    /// Classifier with the built-in default rule set.
    pub fn with_default_rules() -> Self {
        Self::from_config(&default_rules()).expect("default rules always compile")
    }

    /// Classify a URL. Total: unrecognized shapes are `Irrelevant`.
    ///
    /// The role is derived from the canonical URL form, so the same page
    /// reached with or without a fragment classifies identically.
    pub fn classify(&self, url: &Url, content_type: &str) -> Role {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Role::Irrelevant;
        }

        let canonical = canonical_url(url);
        let url_str = canonical.as_str();

        for rule in &self.rules {
            if rule.matches(url_str, content_type) {
                debug!(url = url_str, rule = %rule.name, role = ?rule.role, "classified");
                return rule.role;
            }
        }

        Role::Irrelevant
    }
}

// ---------------------------------------------------------------------------
// Default rules
// ---------------------------------------------------------------------------

/// Built-in classification rules for a regulatory document site.
///
/// Ordering matters and is most-specific-first: the English-document rules
/// sit above the broader language-variant exclusions they carve out of.
pub fn default_rules() -> Vec<ClassifyRuleConfig> {
    let rule = |name: &str, role: Role, url_pattern: Option<&str>, content_type: Option<&str>| {
        ClassifyRuleConfig {
            name: name.into(),
            role,
            url_pattern: url_pattern.map(String::from),
            content_type: content_type.map(String::from),
        }
    };

    vec![
        // Static assets and machine formats are never worth a node.
        rule(
            "binary-assets",
            Role::Irrelevant,
            Some(r"(?i)\.(png|jpe?g|gif|svg|ico|css|js|xml|xsd|woff2?|ttf)$"),
            None,
        ),
        // English document variants, ahead of the language exclusions below.
        rule(
            "english-document",
            Role::Attachment,
            Some(r"(?i)_en(-\d{1,2})?\.(pdf|docx?|xlsx?|pptx?)$"),
            None,
        ),
        rule(
            "english-legal-text",
            Role::Attachment,
            Some(r"/EN/TXT/"),
            None,
        ),
        // Language-suffixed document variants (…_de.pdf, …_fr-3.pdf).
        rule(
            "language-variant-document",
            Role::Irrelevant,
            Some(r"(?i)_[a-z]{2}(-\d{1,2})?\.(pdf|docx?|xlsx?|pptx?)$"),
            None,
        ),
        rule(
            "language-variant-legal-text",
            Role::Irrelevant,
            Some(r"/[A-Z]{2}/TXT/"),
            None,
        ),
        // Remaining downloadable documents.
        rule(
            "document-extension",
            Role::Attachment,
            Some(r"(?i)\.(pdf|docx?|xlsx?|pptx?|zip)$"),
            None,
        ),
        rule("pdf-content-type", Role::Attachment, None, Some("application/pdf")),
        // Listing/search/navigation pages.
        rule(
            "listing-page",
            Role::IndexPage,
            Some(r"(?i)(/search|/sitemap|/glossary|[?&]page=\d+)"),
            None,
        ),
        // Any remaining HTML is a content page.
        rule("html-page", Role::DocumentPage, None, Some("text/html")),
        // No content type but an HTML-ish path: treat as a content page.
        rule(
            "extensionless-path",
            Role::DocumentPage,
            Some(r"(?i)(/[^./?#]+|\.html?)$"),
            None,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("test url")
    }

    fn classifier() -> Classifier {
        Classifier::with_default_rules()
    }

    #[test]
    fn html_pages_are_document_pages() {
        let c = classifier();
        assert_eq!(
            c.classify(&url("https://agency.example/medicines/overview"), "text/html"),
            Role::DocumentPage
        );
    }

    #[test]
    fn pdf_links_are_attachments() {
        let c = classifier();
        assert_eq!(
            c.classify(&url("https://agency.example/documents/report_en.pdf"), ""),
            Role::Attachment
        );
        assert_eq!(
            c.classify(&url("https://agency.example/documents/guideline.pdf"), ""),
            Role::Attachment
        );
        // Content type alone is enough.
        assert_eq!(
            c.classify(&url("https://agency.example/download?id=42"), "application/pdf"),
            Role::Attachment
        );
    }

    #[test]
    fn language_variants_are_excluded() {
        let c = classifier();
        assert_eq!(
            c.classify(&url("https://agency.example/documents/report_de.pdf"), ""),
            Role::Irrelevant
        );
        assert_eq!(
            c.classify(&url("https://agency.example/documents/report_sk-2.pdf"), ""),
            Role::Irrelevant
        );
        // ...but the English variant stays an attachment.
        assert_eq!(
            c.classify(&url("https://agency.example/documents/report_en.pdf"), ""),
            Role::Attachment
        );
    }

    #[test]
    fn legal_text_language_routing() {
        let c = classifier();
        assert_eq!(
            c.classify(&url("https://law.example/legal-content/EN/TXT/?uri=x"), ""),
            Role::Attachment
        );
        assert_eq!(
            c.classify(&url("https://law.example/legal-content/DE/TXT/?uri=x"), ""),
            Role::Irrelevant
        );
    }

    #[test]
    fn assets_are_irrelevant() {
        let c = classifier();
        assert_eq!(
            c.classify(&url("https://agency.example/logo.svg"), ""),
            Role::Irrelevant
        );
        assert_eq!(
            c.classify(&url("https://agency.example/feed.xml"), "application/xml"),
            Role::Irrelevant
        );
    }

    #[test]
    fn search_and_pagination_are_index_pages() {
        let c = classifier();
        assert_eq!(
            c.classify(&url("https://agency.example/search?query=aspirin"), "text/html"),
            Role::IndexPage
        );
        assert_eq!(
            c.classify(&url("https://agency.example/medicines?page=3"), "text/html"),
            Role::IndexPage
        );
    }

    #[test]
    fn non_http_schemes_are_irrelevant() {
        let c = classifier();
        assert_eq!(c.classify(&url("mailto:info@agency.example"), ""), Role::Irrelevant);
        assert_eq!(c.classify(&url("ftp://agency.example/file.pdf"), ""), Role::Irrelevant);
    }

    #[test]
    fn unmatched_urls_default_to_irrelevant() {
        let c = Classifier::from_config(&[ClassifyRuleConfig {
            name: "only-pdfs".into(),
            role: Role::Attachment,
            url_pattern: Some(r"\.pdf$".into()),
            content_type: None,
        }])
        .unwrap();
        assert_eq!(
            c.classify(&url("https://agency.example/page"), "text/html"),
            Role::Irrelevant
        );
    }

    #[test]
    fn classification_is_stable_under_rule_appends() {
        // Appending a broader rule must not re-route URLs an earlier rule
        // already claims.
        let mut rules = default_rules();
        let c_before = Classifier::from_config(&rules).unwrap();
        let u = url("https://agency.example/documents/report_en.pdf");
        let before = c_before.classify(&u, "");

        rules.push(ClassifyRuleConfig {
            name: "catch-all-documents".into(),
            role: Role::Irrelevant,
            url_pattern: Some(r"(?i)/documents/".into()),
            content_type: None,
        });
        let c_after = Classifier::from_config(&rules).unwrap();
        assert_eq!(c_after.classify(&u, ""), before);
    }

    #[test]
    fn fragment_does_not_change_classification() {
        let c = classifier();
        assert_eq!(
            c.classify(&url("https://agency.example/report_en.pdf#page=4"), ""),
            Role::Attachment
        );
    }
}
