//! HTML content extraction.
//!
//! Walks the content area of a page (chrome stripped), preserving the
//! heading hierarchy as sections and collecting outbound links and
//! category/topic badge labels along the way.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use regraph_shared::{ExtractedContent, Section};

use crate::ContentExtractor;

/// Tags whose subtrees are navigational/boilerplate chrome.
const SKIP_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "svg", "iframe", "form",
    "button", "input",
];

/// Class fragments marking chrome containers (site component library:
/// breadcrumbs, in-page navigation, dropdown menus). Badges are metadata,
/// collected separately as tags.
const SKIP_CLASSES: &[&str] = &[
    "breadcrumb",
    "sidebar",
    "dropdown-menu",
    "inpage-navigation",
    "skip-link",
    "badge",
];

/// Candidate selectors for the main content area, most specific first.
const CONTENT_SELECTORS: &[&str] = &["main", "article", r#"[role="main"]"#, ".content", "body"];

/// Extractor for HTML pages.
pub struct HtmlExtractor;

impl ContentExtractor for HtmlExtractor {
    fn name(&self) -> &'static str {
        "html"
    }

    fn supports(&self, content_type: &str) -> bool {
        content_type.starts_with("text/html") || content_type.starts_with("application/xhtml")
    }

    fn extract(&self, bytes: &[u8], source_url: &str) -> ExtractedContent {
        let mut warnings = Vec::new();

        let html_src = match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                warnings.push("encoding-error".to_string());
                String::from_utf8_lossy(bytes).into_owned()
            }
        };

        let doc = Html::parse_document(&html_src);
        let base = Url::parse(source_url).ok();

        let title = extract_title(&doc);
        let tags = extract_tags(&doc);

        let mut collector = Collector::new(base);
        if let Some(root) = content_root(&doc) {
            collector.walk(root);
        }
        collector.flush_section();

        let sections = collector.sections;
        let body_text = join_sections(&sections);
        if body_text.is_empty() {
            warnings.push("empty-document".to_string());
        }

        ExtractedContent {
            source_url: source_url.to_string(),
            title,
            body_text,
            sections,
            outbound_links: collector.links,
            tags,
            warnings,
        }
    }
}

/// Pick the main content element, falling back through readability-style
/// candidates down to `<body>`.
fn content_root(doc: &Html) -> Option<ElementRef<'_>> {
    for sel_str in CONTENT_SELECTORS {
        let sel = Selector::parse(sel_str).expect("valid selector");
        if let Some(el) = doc.select(&sel).next() {
            return Some(el);
        }
    }
    None
}

/// Title from the first `<h1>`, falling back to `<title>`.
fn extract_title(doc: &Html) -> Option<String> {
    for sel_str in ["h1", "title"] {
        let sel = Selector::parse(sel_str).expect("valid selector");
        if let Some(el) = doc.select(&sel).next() {
            let text = collapse_ws(&el.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Category/topic badge labels (become Entity nodes downstream).
fn extract_tags(doc: &Html) -> Vec<String> {
    let sel = Selector::parse(r#"[class*="badge"]"#).expect("valid selector");
    let mut seen = HashSet::new();
    let mut tags = Vec::new();

    for el in doc.select(&sel) {
        let relevant = el
            .value()
            .classes()
            .any(|c| c.contains("category") || c.contains("topic"));
        if !relevant {
            continue;
        }
        let label = collapse_ws(&el.text().collect::<String>());
        if !label.is_empty() && seen.insert(label.to_lowercase()) {
            tags.push(label);
        }
    }

    tags
}

// ---------------------------------------------------------------------------
// Content walker
// ---------------------------------------------------------------------------

/// Accumulates section text, splitting at headings, while skipping chrome
/// subtrees and recording outbound links in document order.
struct Collector {
    base: Option<Url>,
    sections: Vec<Section>,
    current_heading: Option<String>,
    current_text: String,
    links: Vec<String>,
    seen_links: HashSet<String>,
}

impl Collector {
    fn new(base: Option<Url>) -> Self {
        Self {
            base,
            sections: Vec::new(),
            current_heading: None,
            current_text: String::new(),
            links: Vec::new(),
            seen_links: HashSet::new(),
        }
    }

    fn walk(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                scraper::Node::Text(text) => {
                    self.current_text.push_str(text);
                }
                scraper::Node::Element(element) => {
                    let name = element.name();
                    if SKIP_TAGS.contains(&name) || has_skip_class(element) {
                        continue;
                    }
                    let Some(child_ref) = ElementRef::wrap(child) else {
                        continue;
                    };

                    if matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6") {
                        self.flush_section();
                        let heading = collapse_ws(&child_ref.text().collect::<String>());
                        self.current_heading = (!heading.is_empty()).then_some(heading);
                        continue;
                    }

                    if name == "a" {
                        if let Some(href) = element.attr("href") {
                            self.record_link(href);
                        }
                    }
                    if name == "br" {
                        self.current_text.push_str("\n\n");
                        continue;
                    }

                    self.walk(child_ref);

                    if is_block(name) {
                        self.current_text.push_str("\n\n");
                    }
                }
                _ => {}
            }
        }
    }

    fn record_link(&mut self, href: &str) {
        if href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            return;
        }
        let Some(base) = &self.base else { return };
        let Ok(mut resolved) = base.join(href) else {
            return;
        };
        resolved.set_fragment(None);
        let link = resolved.to_string();
        if self.seen_links.insert(link.clone()) {
            self.links.push(link);
        }
    }

    fn flush_section(&mut self) {
        let text = normalize_block(&self.current_text);
        self.current_text.clear();
        if text.is_empty() && self.current_heading.is_none() {
            return;
        }
        if text.is_empty() {
            // Heading with no body yet; keep it pending for the next flush.
            return;
        }
        self.sections.push(Section {
            heading: self.current_heading.take(),
            text,
        });
    }
}

fn has_skip_class(element: &scraper::node::Element) -> bool {
    element
        .classes()
        .any(|class| SKIP_CLASSES.iter().any(|skip| class.contains(skip)))
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "li"
            | "ul"
            | "ol"
            | "table"
            | "tr"
            | "blockquote"
            | "section"
            | "article"
            | "dd"
            | "dt"
            | "figcaption"
            | "pre"
    )
}

// ---------------------------------------------------------------------------
// Whitespace helpers
// ---------------------------------------------------------------------------

/// Collapse all whitespace to single spaces.
fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a block of text: paragraph breaks preserved, inner whitespace
/// collapsed, empties dropped.
fn normalize_block(text: &str) -> String {
    text.split("\n\n")
        .map(collapse_ws)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Assemble the full body text from sections (headings inline).
fn join_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| match &s.heading {
            Some(heading) => format!("{heading}\n\n{}", s.text),
            None => s.text.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
