use std::path::Path;

use common::types::{Chunk, ChunkMetadata};

/// Computes per-chunk metadata for a document: file naming, page spans for
/// paged formats and the closest preceding markdown heading.
pub fn compute_metadata(
    chunks: &[Chunk],
    text: &str,
    pages: Option<&[String]>,
    path: &Path,
) -> Vec<ChunkMetadata> {
    let file_type = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase());
    let doc_title = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let headings = heading_index(text);

    chunks
        .iter()
        .map(|chunk| {
            let (page_from, page_to) = match pages {
                Some(pages) if !pages.is_empty() => {
                    let (from, to) = page_span(chunk.start, chunk.end, pages);
                    (Some(from), Some(to))
                }
                _ => (None, None),
            };

            ChunkMetadata {
                file_type: file_type.clone(),
                doc_title: doc_title.clone(),
                page_from,
                page_to,
                section: section_for(chunk.start, &headings),
                enrichment: None,
            }
        })
        .collect()
}

/// `(byte offset, heading text)` for every markdown heading, in order.
fn heading_index(text: &str) -> Vec<(usize, String)> {
    let mut headings = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(heading) = parse_heading(line) {
            headings.push((offset, heading));
        }
        offset += line.len();
    }
    headings
}

/// A line of the form `#{1,6} title`.
fn parse_heading(line: &str) -> Option<String> {
    let trimmed = line.trim_end();
    let hashes = trimmed.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = trimmed.get(hashes..)?;
    let title = rest.strip_prefix(' ')?.trim();
    (!title.is_empty()).then(|| title.to_owned())
}

/// Most recent heading at or before the given offset.
fn section_for(offset: usize, headings: &[(usize, String)]) -> Option<String> {
    headings
        .iter()
        .take_while(|(heading_offset, _)| *heading_offset <= offset)
        .last()
        .map(|(_, title)| title.clone())
}

/// Maps a chunk's byte span onto 1-based page numbers via cumulative page
/// text lengths. Offsets beyond the final page clamp to the last page, and
/// both endpoints clamp to at least 1.
fn page_span(start: usize, end: usize, pages: &[String]) -> (usize, usize) {
    let page_from = page_at(start, pages);
    let page_to = page_at(end.saturating_sub(1), pages).max(page_from);
    (page_from, page_to)
}

fn page_at(offset: usize, pages: &[String]) -> usize {
    let mut cumulative = 0usize;
    for (index, page) in pages.iter().enumerate() {
        cumulative += page.len();
        if offset < cumulative {
            return index + 1;
        }
    }
    pages.len().max(1)
}
