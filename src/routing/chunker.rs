//! Size-bounded text splitting.
//!
//! Lengths are counted in `char`s. A piece is cut at the last newline
//! within the limit, else the last space, else exactly at the limit. The
//! whitespace run at each cut is dropped from the start of the remainder.

/// Characters stripped from the start of the remainder after a cut.
const BOUNDARY_TRIM: [char; 2] = ['\n', ' '];

/// Split `text` into pieces of at most `limit` characters.
///
/// Text that already fits is returned as a single piece, unchanged (even
/// when empty). A `limit` of zero is treated as one.
pub fn split(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while exceeds(rest, limit) {
        let (head, tail) = split_once(rest, limit);
        chunks.push(head.to_owned());
        rest = tail;
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_owned());
    }
    chunks
}

/// Cut the first piece off `text`.
///
/// Returns `(head, remainder)`; the remainder has its leading newlines and
/// spaces stripped. When `text` fits, the remainder is empty.
pub fn split_once(text: &str, limit: usize) -> (&str, &str) {
    let limit = limit.max(1);
    if !exceeds(text, limit) {
        return (text, "");
    }
    let cut = cut_point(text, limit);
    let (head, tail) = text.split_at(cut);
    (head, tail.trim_start_matches(BOUNDARY_TRIM))
}

/// Split a caption into the part that rides on the media and the overflow
/// that must be delivered as trailing text.
///
/// Unlike [`split`], newlines are not cut points: the caption header is
/// separated from the body by a blank line, and cutting there would leave
/// the media with a header and no body. The head ends at the last space
/// before `limit`, else exactly at `limit`; leading whitespace is trimmed
/// from the overflow.
pub fn split_caption(caption: &str, limit: usize) -> (String, Option<String>) {
    let limit = limit.max(1);
    if !exceeds(caption, limit) {
        return (caption.to_owned(), None);
    }
    let window = &caption[..byte_offset(caption, limit)];
    let cut = window
        .rfind(' ')
        .filter(|&pos| pos > 0)
        .unwrap_or(window.len());
    let (head, tail) = caption.split_at(cut);
    let overflow = tail.trim_start();
    let overflow = (!overflow.is_empty()).then(|| overflow.to_owned());
    (head.to_owned(), overflow)
}

/// Whether `text` is longer than `limit` characters.
fn exceeds(text: &str, limit: usize) -> bool {
    text.chars().nth(limit).is_some()
}

/// Byte offset of the character at index `chars`, or the end of `text`.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(offset, _)| offset)
}

/// Byte offset to cut at. Always > 0 so every iteration makes progress.
fn cut_point(text: &str, limit: usize) -> usize {
    // A boundary sitting exactly at `limit` still yields a full-length head.
    let window = &text[..byte_offset(text, limit.saturating_add(1))];
    for boundary in ['\n', ' '] {
        if let Some(pos) = window.rfind(boundary).filter(|&pos| pos > 0) {
            return pos;
        }
    }
    byte_offset(text, limit)
}
