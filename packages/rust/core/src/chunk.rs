//! Chunk splitting: sections → bounded, stably-indexed embedding units.
//!
//! Splits on section and paragraph boundaries up to a configured maximum,
//! hard-splitting oversized paragraphs with overlap. Given the same
//! extraction the output (index, text) pairs are identical, which is what
//! makes re-embedding idempotent.

use regraph_shared::{Chunk, ChunkingConfig, ExtractedContent, NodeId};

/// Split extracted content into chunks under `parent` (the Document node).
pub fn split_chunks(
    content: &ExtractedContent,
    parent: NodeId,
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: u32 = 0;

    for section in &content.sections {
        let pieces = pack_section(section.heading.as_deref(), &section.text, config);
        for text in pieces {
            chunks.push(Chunk {
                parent_id: parent,
                index,
                text,
                embedding: None,
            });
            index += 1;
        }
    }

    chunks
}

/// Pack one section into chunk-sized pieces. The heading prefixes the first
/// piece so every chunk carries its context (a long heading may nudge that
/// piece slightly past the limit).
fn pack_section(heading: Option<&str>, text: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").filter(|p| !p.trim().is_empty()) {
        if paragraph.len() > config.max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(hard_split(paragraph, config.max_chars, config.overlap_chars));
            continue;
        }

        let separator = if current.is_empty() { 0 } else { 2 };
        if !current.is_empty() && current.len() + separator + paragraph.len() > config.max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    if let Some(heading) = heading {
        if let Some(first) = pieces.first_mut() {
            *first = format!("{heading}\n\n{first}");
        }
    }

    pieces
}

/// Split an oversized paragraph at character boundaries with overlap
/// carried between pieces.
fn hard_split(paragraph: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let boundaries: Vec<usize> = paragraph
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(paragraph.len()))
        .collect();

    let step = max_chars.saturating_sub(overlap_chars).max(1);
    let mut pieces = Vec::new();
    let mut start_char = 0usize;
    let total_chars = boundaries.len() - 1;

    while start_char < total_chars {
        let end_char = (start_char + max_chars).min(total_chars);
        let piece = &paragraph[boundaries[start_char]..boundaries[end_char]];
        pieces.push(piece.to_string());
        if end_char == total_chars {
            break;
        }
        start_char += step;
    }

    pieces
}
