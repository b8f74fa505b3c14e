//! Sliding-window text splitter.
//!
//! Splits extracted page text into pieces of at most `max_chars` characters,
//! with consecutive pieces sharing up to `overlap_chars` characters. The
//! window is measured in `char`s so multi-byte text is never cut inside a
//! code point.
//!
//! Inside each window the cut prefers, in order: a paragraph break
//! (`\n\n`), a line break, any whitespace. Only when none of those occur in
//! the back half of the window is the text cut hard at `max_chars`.

fn is_paragraph_break(chars: &[char], i: usize) -> bool {
    chars[i] == '\n' && i > 0 && chars[i - 1] == '\n'
}

fn is_line_break(chars: &[char], i: usize) -> bool {
    chars[i] == '\n'
}

fn is_space(chars: &[char], i: usize) -> bool {
    chars[i].is_whitespace()
}

/// Split `text` into overlapping pieces no longer than `max_chars`.
///
/// Whitespace-only pieces are dropped, so empty input yields no pieces
/// and any text with visible characters yields at least one.
pub fn split_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut pieces = Vec::new();

    if max_chars == 0 {
        return pieces;
    }

    let mut start = 0usize;
    while start < len {
        while start < len && chars[start].is_whitespace() {
            start += 1;
        }
        if start >= len {
            break;
        }

        let hard_end = (start + max_chars).min(len);
        let end = if hard_end == len {
            len
        } else {
            find_break(&chars, start, hard_end)
        };

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }

        if end == len {
            break;
        }

        let mut next = end.saturating_sub(overlap_chars);
        if next <= start {
            next = end;
        }
        start = align_to_word(&chars, next, end);
    }

    pieces
}

/// Position just after the best separator in `(start + window/2, hard_end)`.
fn find_break(chars: &[char], start: usize, hard_end: usize) -> usize {
    let floor = start + (hard_end - start) / 2;
    let breaks: [fn(&[char], usize) -> bool; 3] = [is_paragraph_break, is_line_break, is_space];
    for is_break in breaks {
        if let Some(i) = (floor + 1..hard_end).rev().find(|&i| is_break(chars, i)) {
            return i + 1;
        }
    }
    hard_end
}

/// Move `pos` forward to the start of the next word, never past `limit`.
fn align_to_word(chars: &[char], pos: usize, limit: usize) -> usize {
    if pos == 0 || chars[pos - 1].is_whitespace() {
        return pos;
    }
    (pos..limit)
        .find(|&i| chars[i].is_whitespace())
        .map(|i| i + 1)
        .unwrap_or(pos)
}
