//! Plain-text content extraction.

use regraph_shared::{ExtractedContent, Section};

use crate::ContentExtractor;

/// Extractor for `text/plain` resources.
pub struct PlainTextExtractor;

impl ContentExtractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn supports(&self, content_type: &str) -> bool {
        content_type.starts_with("text/plain")
    }

    fn extract(&self, bytes: &[u8], source_url: &str) -> ExtractedContent {
        let mut warnings = Vec::new();

        let text = match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                warnings.push("encoding-error".to_string());
                String::from_utf8_lossy(bytes).into_owned()
            }
        };

        let body_text = normalize(&text);
        if body_text.is_empty() {
            warnings.push("empty-document".to_string());
        }

        let sections = if body_text.is_empty() {
            Vec::new()
        } else {
            vec![Section {
                heading: None,
                text: body_text.clone(),
            }]
        };

        ExtractedContent {
            source_url: source_url.to_string(),
            title: None,
            body_text,
            sections,
            outbound_links: Vec::new(),
            tags: Vec::new(),
            warnings,
        }
    }
}

/// Collapse intra-paragraph whitespace, keep blank-line paragraph breaks.
fn normalize(text: &str) -> String {
    text.split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
