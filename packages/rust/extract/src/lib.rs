//! Content extraction: raw fetched bytes → [`ExtractedContent`].
//!
//! This crate provides:
//! - [`ContentExtractor`] — the extraction capability, one impl per format
//! - [`ExtractorRegistry`] — factory keyed on content type, with a null
//!   fallback so the pipeline continues on unsupported formats
//!
//! Extraction is infallible by contract: malformed input yields an empty
//! body plus warnings, never an error or a panic escaping the extractor.

mod html;
mod pdf;
mod text;

pub use html::HtmlExtractor;
pub use pdf::PdfExtractor;
pub use text::PlainTextExtractor;

use regraph_shared::ExtractedContent;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Format-specific content extraction.
///
/// Implementations are synchronous; the pipeline runs them on a blocking
/// thread. They must not panic on arbitrary input.
pub trait ContentExtractor: Send + Sync {
    /// Human-readable extractor name for tracing.
    fn name(&self) -> &'static str;

    /// Whether this extractor handles the given content type.
    fn supports(&self, content_type: &str) -> bool;

    /// Extract normalized content. Never fails; problems become warnings.
    fn extract(&self, bytes: &[u8], source_url: &str) -> ExtractedContent;
}

// ---------------------------------------------------------------------------
// Null extractor
// ---------------------------------------------------------------------------

/// Fallback for unknown content types: empty body, one warning.
pub struct NullExtractor;

impl ContentExtractor for NullExtractor {
    fn name(&self) -> &'static str {
        "null"
    }

    fn supports(&self, _content_type: &str) -> bool {
        true
    }

    fn extract(&self, _bytes: &[u8], source_url: &str) -> ExtractedContent {
        ExtractedContent::failed(source_url, "unsupported-content-type")
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds the format extractors; selection is by content type with light
/// magic-byte sniffing when the fetcher supplied none.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn ContentExtractor>>,
    fallback: NullExtractor,
}

impl ExtractorRegistry {
    /// Registry with all built-in extractors.
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(HtmlExtractor),
                Box::new(PdfExtractor),
                Box::new(PlainTextExtractor),
            ],
            fallback: NullExtractor,
        }
    }

    /// Select an extractor for a content type. Unknown types get the null
    /// extractor; the pipeline must continue rather than abort.
    pub fn for_content_type(&self, content_type: &str) -> &dyn ContentExtractor {
        for extractor in &self.extractors {
            if extractor.supports(content_type) {
                return extractor.as_ref();
            }
        }
        &self.fallback
    }

    /// Select an extractor for a resource, sniffing the leading bytes when
    /// the fetcher did not report a content type.
    pub fn for_resource(&self, content_type: &str, bytes: &[u8]) -> &dyn ContentExtractor {
        let effective = if content_type.trim().is_empty() {
            sniff_content_type(bytes)
        } else {
            content_type
        };
        self.for_content_type(effective)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort content-type sniff from magic bytes.
fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    let head = &bytes[..bytes.len().min(512)];
    let head = String::from_utf8_lossy(head);
    let head = head.trim_start().to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return "text/html";
    }
    ""
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_routes_by_content_type() {
        let registry = ExtractorRegistry::new();
        assert_eq!(registry.for_content_type("text/html; charset=utf-8").name(), "html");
        assert_eq!(registry.for_content_type("application/pdf").name(), "pdf");
        assert_eq!(registry.for_content_type("text/plain").name(), "text");
        assert_eq!(registry.for_content_type("application/zip").name(), "null");
    }

    #[test]
    fn registry_sniffs_when_content_type_missing() {
        let registry = ExtractorRegistry::new();
        assert_eq!(registry.for_resource("", b"%PDF-1.7 ...").name(), "pdf");
        assert_eq!(
            registry.for_resource("", b"<!DOCTYPE html><html><body></body></html>").name(),
            "html"
        );
        assert_eq!(registry.for_resource("", b"\x00\x01\x02").name(), "null");
    }

    #[test]
    fn null_extractor_warns_and_continues() {
        let content = NullExtractor.extract(b"whatever", "https://agency.example/x.zip");
        assert!(content.body_text.is_empty());
        assert_eq!(content.warnings, vec!["unsupported-content-type"]);
        assert_eq!(content.source_url, "https://agency.example/x.zip");
    }
}
