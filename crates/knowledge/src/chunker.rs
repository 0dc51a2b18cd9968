//! Text chunking with configurable size and overlap.
//!
//! Sizes are counted in characters (Unicode scalar values). Chunk text is
//! never trimmed, so dropping the first `overlap` characters of every chunk
//! after the first and concatenating reproduces the document exactly.

use crate::types::{Chunk, Document};
use ragchat_core::{AppError, AppResult};

/// Split a document into overlapping chunks.
///
/// Consecutive chunks start `chunk_size - overlap` characters apart; every
/// chunk except possibly the last spans exactly `chunk_size` characters.
///
/// # Errors
/// `InvalidInput` if `chunk_size` is 0, `overlap >= chunk_size`, or the
/// document text is empty.
pub fn chunk_document(document: &Document, chunk_size: usize, overlap: usize) -> AppResult<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(AppError::InvalidInput(
            "chunk_size must be greater than 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(AppError::InvalidInput(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }

    let text = document.text.as_str();
    if text.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "Document {} has no text",
            document.source_ref
        )));
    }

    // Byte offset of every char boundary, including the end of the text
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;
    let step = chunk_size - overlap;

    let mut chunks = Vec::with_capacity(char_count / step + 1);
    let mut start = 0usize;
    let mut ordinal = 0u32;

    loop {
        let end = (start + chunk_size).min(char_count);

        chunks.push(Chunk {
            id: Chunk::chunk_id(&document.id, ordinal),
            document_id: document.id.clone(),
            source_ref: document.source_ref.clone(),
            text: text[boundaries[start]..boundaries[end]].to_string(),
            ordinal,
            start,
            end,
        });

        if end == char_count {
            break;
        }

        start += step;
        ordinal += 1;
    }

    tracing::debug!(
        document_id = %document.id,
        chunks = chunks.len(),
        chunk_size,
        overlap,
        "Chunked document"
    );

    Ok(chunks)
}
