//! Windowed, sentence-aware chunk segmentation.
//!
//! Sentences are accumulated greedily until the token budget would be
//! exceeded; each new chunk starts with whole sentences carried back from
//! the previous chunk's tail until the carried token count reaches or
//! just exceeds the overlap target. Overlap is sentence-granular, so the
//! actual overlap may exceed the configured value. Segmentation is a
//! pure function of `(text, chunk_size_tokens, overlap_tokens)`.

use crate::text::{Sentence, sentences_of};
use crate::types::SegmentationError;

/// A segmented chunk before persistence: text, token count, and the
/// token count shared with the previous chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentedChunk {
    pub text: String,
    pub token_count: usize,
    pub overlap_prev: usize,
}

/// Split `text` into overlapping, token-bounded, sentence-aware chunks.
///
/// A single sentence longer than `chunk_size_tokens` is emitted as its
/// own oversized chunk rather than dropped or truncated. Chunks are
/// returned in emission order (index 0 first).
pub fn segment(
    text: &str,
    chunk_size_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<SegmentedChunk>, SegmentationError> {
    if chunk_size_tokens == 0 {
        return Err(SegmentationError::InvalidChunkSize(chunk_size_tokens));
    }
    if overlap_tokens >= chunk_size_tokens {
        return Err(SegmentationError::OverlapTooLarge {
            overlap: overlap_tokens,
            chunk_size: chunk_size_tokens,
        });
    }

    let sentences = sentences_of(text);
    if sentences.is_empty() {
        return Err(SegmentationError::EmptyInput);
    }

    let mut chunks = Vec::new();
    let mut buffer: Vec<Sentence> = Vec::new();
    let mut buffer_tokens = 0usize;
    // Leading sentences of `buffer` that were carried back from the
    // previous chunk. A chunk is only emitted once it contains at least
    // one sentence beyond the carryover, otherwise an oversized carried
    // sentence would be re-emitted verbatim forever.
    let mut carried = 0usize;
    let mut overlap_prev = 0usize;

    for sentence in sentences {
        let would_exceed = buffer_tokens + sentence.token_count > chunk_size_tokens;
        if would_exceed && buffer.len() > carried {
            chunks.push(emit(&buffer, buffer_tokens, overlap_prev));
            let (tail, tail_tokens) = carry_back(&buffer, overlap_tokens);
            overlap_prev = tail_tokens;
            carried = tail.len();
            buffer = tail;
            buffer_tokens = tail_tokens;
        }
        buffer_tokens += sentence.token_count;
        buffer.push(sentence);
    }

    if buffer.len() > carried {
        chunks.push(emit(&buffer, buffer_tokens, overlap_prev));
    }

    Ok(chunks)
}

fn emit(buffer: &[Sentence], token_count: usize, overlap_prev: usize) -> SegmentedChunk {
    let text = buffer
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    SegmentedChunk {
        text,
        token_count,
        overlap_prev,
    }
}

/// Carry whole sentences backward from the buffer tail until the
/// cumulative token count reaches or just exceeds `overlap_tokens`.
fn carry_back(buffer: &[Sentence], overlap_tokens: usize) -> (Vec<Sentence>, usize) {
    let mut tail = Vec::new();
    let mut tokens = 0usize;
    for sentence in buffer.iter().rev() {
        if tokens >= overlap_tokens {
            break;
        }
        tokens += sentence.token_count;
        tail.push(sentence.clone());
    }
    tail.reverse();
    (tail, tokens)
}
