//! PDF content extraction.
//!
//! Text comes from `pdf-extract`; pages are split on form feeds when the
//! backend emits them, and running headers/footers repeated across pages
//! are stripped best-effort. Malformed files degrade to an empty body with
//! an `unparseable-pdf` warning — extraction never fails.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::debug;

use regraph_shared::{ExtractedContent, Section};

use crate::ContentExtractor;

/// A line must appear on at least this share of pages to count as a
/// running header/footer.
const REPEAT_THRESHOLD: f32 = 0.6;

/// Extractor for PDF documents.
pub struct PdfExtractor;

impl ContentExtractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn supports(&self, content_type: &str) -> bool {
        content_type.starts_with("application/pdf")
    }

    fn extract(&self, bytes: &[u8], source_url: &str) -> ExtractedContent {
        // pdf-extract can panic on hostile input; contain it.
        let extracted = catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(bytes)
        }));

        let text = match extracted {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                debug!(url = source_url, error = %e, "pdf extraction failed");
                return ExtractedContent::failed(source_url, "unparseable-pdf");
            }
            Err(_) => {
                debug!(url = source_url, "pdf extraction panicked");
                return ExtractedContent::failed(source_url, "unparseable-pdf");
            }
        };

        let pages = split_pages(&text);
        let pages = strip_repeated_lines(pages);

        let sections: Vec<Section> = pages
            .iter()
            .map(|page| normalize_page(page))
            .filter(|text| !text.is_empty())
            .map(|text| Section {
                heading: None,
                text,
            })
            .collect();

        let body_text = sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let title = body_text
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().chars().take(160).collect::<String>());

        let mut warnings = Vec::new();
        if body_text.is_empty() {
            warnings.push("empty-document".to_string());
        }

        ExtractedContent {
            source_url: source_url.to_string(),
            title,
            body_text,
            sections,
            outbound_links: Vec::new(),
            tags: Vec::new(),
            warnings,
        }
    }
}

/// Split extracted text into pages on form feeds; without them the whole
/// text is one page.
fn split_pages(text: &str) -> Vec<String> {
    if text.contains('\u{0C}') {
        text.split('\u{0C}').map(str::to_string).collect()
    } else {
        vec![text.to_string()]
    }
}

/// Drop lines repeated on most pages (running headers/footers, page
/// numbering). Only meaningful with three or more pages.
fn strip_repeated_lines(pages: Vec<String>) -> Vec<String> {
    if pages.len() < 3 {
        return pages;
    }

    let mut line_pages: HashMap<String, usize> = HashMap::new();
    for page in &pages {
        let mut seen_on_page = std::collections::HashSet::new();
        for line in page.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if seen_on_page.insert(trimmed.to_string()) {
                *line_pages.entry(trimmed.to_string()).or_default() += 1;
            }
        }
    }

    let min_pages = ((pages.len() as f32) * REPEAT_THRESHOLD).ceil() as usize;
    let repeated: std::collections::HashSet<&String> = line_pages
        .iter()
        .filter(|(_, count)| **count >= min_pages)
        .map(|(line, _)| line)
        .collect();

    pages
        .into_iter()
        .map(|page| {
            page.lines()
                .filter(|line| !repeated.contains(&line.trim().to_string()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

/// Normalize a page: paragraph breaks preserved, inner whitespace collapsed.
fn normalize_page(page: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in page.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&trimmed.split_whitespace().collect::<Vec<_>>().join(" "));
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_pdf_yields_warning_not_failure() {
        let content = PdfExtractor.extract(
            b"%PDF-1.7 this is not really a pdf at all",
            "https://agency.example/doc.pdf",
        );
        assert!(content.body_text.is_empty());
        assert!(!content.warnings.is_empty());
        assert!(content.warnings.contains(&"unparseable-pdf".to_string()));
    }

    #[test]
    fn garbage_bytes_yield_warning_not_panic() {
        let content = PdfExtractor.extract(&[0u8; 64], "https://agency.example/doc.pdf");
        assert!(content.body_text.is_empty());
        assert_eq!(content.warnings, vec!["unparseable-pdf"]);
    }

    #[test]
    fn repeated_lines_are_stripped() {
        let pages = vec![
            "Agency Report\nPage content one\nConfidential".to_string(),
            "Agency Report\nPage content two\nConfidential".to_string(),
            "Agency Report\nPage content three\nConfidential".to_string(),
        ];
        let cleaned = strip_repeated_lines(pages);
        assert!(cleaned.iter().all(|p| !p.contains("Agency Report")));
        assert!(cleaned.iter().all(|p| !p.contains("Confidential")));
        assert!(cleaned[1].contains("Page content two"));
    }

    #[test]
    fn short_documents_keep_all_lines() {
        let pages = vec!["Header\nBody".to_string(), "Header\nMore".to_string()];
        let cleaned = strip_repeated_lines(pages.clone());
        assert_eq!(cleaned, pages);
    }

    #[test]
    fn page_normalization_preserves_paragraphs() {
        let text = "First   line\ncontinues here\n\nSecond    paragraph\n";
        assert_eq!(
            normalize_page(text),
            "First line continues here\n\nSecond paragraph"
        );
    }

    #[test]
    fn form_feed_splits_pages() {
        let pages = split_pages("page one\u{0C}page two\u{0C}page three");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1], "page two");
    }
}
