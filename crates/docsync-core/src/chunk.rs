//! Overlapping fixed-size text chunker.
//!
//! Splits a file's extracted text into [`Chunk`]s of at most `chunk_size`
//! characters, where consecutive chunks share up to `overlap` characters
//! so that sentences straddling a boundary remain retrievable.
//!
//! # Algorithm
//!
//! 1. Trim the text; empty text yields no chunks.
//! 2. Open a window of `chunk_size` characters at the current position.
//! 3. Unless the window reaches the end of the text, pull its end back to
//!    the last paragraph break, line break, sentence end, or space found in
//!    the second half of the window. Without any of those, cut hard.
//! 4. Emit the trimmed window, then start the next window `overlap`
//!    characters before the previous end, snapped forward to a word start.
//!
//! Lengths are measured in `char`s, never bytes, so multi-byte text is
//! never split inside a code point.
//!
//! Vector identifiers are derived from `(file_id, ordinal)` by
//! [`vector_id`], which makes re-indexing a file overwrite its previous
//! vectors instead of duplicating them.
//!
//! # Example
//!
//! ```rust
//! use docsync_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("file-1", "Hello world.\n\nSecond paragraph.", 1000, 100);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Namespace for [`vector_id`]. Changing it re-keys every index.
const VECTOR_NAMESPACE: Uuid = Uuid::from_u128(0x8d3c_2f2e_5b4a_4c1e_9a57_0e6b_d1c4_a2f3);

/// Break candidates, strongest first.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Split `text` into overlapping chunks of at most `chunk_size` characters.
///
/// Returns chunks with contiguous ordinals starting at 0. `overlap` must be
/// smaller than `chunk_size`; larger values are clamped so every window
/// still advances.
pub fn chunk_text(file_id: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let text = text.trim();
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    // Byte offset of every char, plus a sentinel for the end of the text.
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    offsets.push(text.len());
    let total = offsets.len() - 1;
    let overlap = overlap.min(chunk_size.saturating_sub(1));

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end == total {
            total
        } else {
            find_break(text, &offsets, start + chunk_size / 2, hard_end)
        };

        let piece = text[offsets[start]..offsets[end]].trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(file_id, chunks.len() as u32, piece));
        }

        if end >= total {
            break;
        }

        let next = end.saturating_sub(overlap).max(start + 1);
        start = snap_to_word_start(text, &offsets, next, end);
    }

    chunks
}

/// Deterministic vector identifier for chunk `ordinal` of `file_id`.
///
/// ```rust
/// use docsync_core::chunk::vector_id;
///
/// assert_eq!(vector_id("abc", 0), vector_id("abc", 0));
/// assert_ne!(vector_id("abc", 0), vector_id("abc", 1));
/// ```
pub fn vector_id(file_id: &str, ordinal: u32) -> String {
    let name = format!("{}:{}", file_id, ordinal);
    Uuid::new_v5(&VECTOR_NAMESPACE, name.as_bytes()).to_string()
}

/// Identifiers for a range of chunk ordinals of `file_id`.
pub fn vector_ids(file_id: &str, range: std::ops::Range<u32>) -> Vec<String> {
    range.map(|ordinal| vector_id(file_id, ordinal)).collect()
}

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Char index just past the strongest separator in `[min, max)`, or `max`.
fn find_break(text: &str, offsets: &[usize], min: usize, max: usize) -> usize {
    let min = min.min(max);
    let window = &text[offsets[min]..offsets[max]];
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let byte = offsets[min] + pos + sep.len();
            let idx = char_index(offsets, byte);
            if idx > min {
                return idx;
            }
        }
    }
    max
}

/// Move `pos` forward to the start of a word, staying before `limit`.
fn snap_to_word_start(text: &str, offsets: &[usize], pos: usize, limit: usize) -> usize {
    if pos == 0 || starts_word(text, offsets, pos) {
        return pos;
    }
    let window = &text[offsets[pos]..offsets[limit]];
    match window.find(char::is_whitespace) {
        Some(ws) => {
            let idx = char_index(offsets, offsets[pos] + ws) + 1;
            if idx < limit {
                idx
            } else {
                pos
            }
        }
        None => pos,
    }
}

fn starts_word(text: &str, offsets: &[usize], pos: usize) -> bool {
    text[offsets[pos - 1]..offsets[pos]]
        .chars()
        .all(char::is_whitespace)
}

/// Char index of a byte offset that lies on a char boundary.
fn char_index(offsets: &[usize], byte: usize) -> usize {
    match offsets.binary_search(&byte) {
        Ok(i) => i,
        Err(i) => i,
    }
}

fn make_chunk(file_id: &str, ordinal: u32, text: &str) -> Chunk {
    Chunk {
        file_id: file_id.to_string(),
        ordinal,
        text: text.to_string(),
        hash: content_hash(text),
    }
}
