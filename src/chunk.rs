//! Boundary-aware text chunker.
//!
//! Splits extracted document text into bounded, optionally overlapping
//! pieces for embedding. Cuts prefer a sentence terminator, then a line
//! break, then a space, searching backward from the size limit; a break
//! point is only accepted past the midpoint of the window so chunks never
//! collapse to a pathologically small tail. Lengths are measured in
//! characters and all slicing is char-boundary safe.
//!
//! Overlap carries `overlap` characters of look-back context into the next
//! chunk. The window start is clamped to strictly increase each iteration,
//! so forward progress is guaranteed for any input.

/// Split `text` into ordered, non-empty chunks of at most `max_size`
/// characters. Identical input always yields the identical sequence.
///
/// Blank input produces an empty vector; input within `max_size` produces
/// a single trimmed chunk.
pub fn chunk_text(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || max_size == 0 {
        return Vec::new();
    }

    // Byte offset of every char boundary, with the total length appended so
    // bounds[i]..bounds[j] is the byte range of char positions i..j.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = bounds.len() - 1;

    if char_len <= max_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < char_len {
        let mut end = (start + max_size).min(char_len);

        if end < char_len {
            end = best_break(text, &bounds, start, end, max_size);
        }

        let piece = text[bounds[start]..bounds[end]].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end >= char_len {
            break;
        }

        // Carry look-back context, clamped so the window always advances.
        let mut next = end.saturating_sub(overlap);
        if next <= start {
            next = end;
        }
        start = next;
    }

    chunks
}

/// Pick the best break point in `(start, end]`, in priority order: last
/// sentence terminator, last line break, last space. A candidate is only
/// used when it lies beyond the window midpoint; otherwise cut hard at
/// `end`.
fn best_break(text: &str, bounds: &[usize], start: usize, end: usize, max_size: usize) -> usize {
    let window = &text[bounds[start]..bounds[end]];
    let midpoint = start + max_size / 2;

    let to_char_pos = |byte_off: usize| -> usize {
        let abs = bounds[start] + byte_off;
        // byte_off comes from rfind on a char boundary, so the lookup is exact
        bounds.partition_point(|&b| b < abs)
    };

    if let Some(off) = window.rfind('.') {
        let pos = to_char_pos(off);
        if pos > midpoint {
            return pos + 1; // keep the terminator with the chunk
        }
    }
    if let Some(off) = window.rfind('\n') {
        let pos = to_char_pos(off);
        if pos > midpoint {
            return pos;
        }
    }
    if let Some(off) = window.rfind(' ') {
        let pos = to_char_pos(off);
        if pos > midpoint {
            return pos;
        }
    }

    end
}
