//! Logging and text-shaping helpers for mesh-originated strings.
//! Escapes control characters that otherwise break log readability, and splits text on
//! UTF-8 boundaries for size-limited radio payloads.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates very long strings (over `max_preview`) with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// UTF-8 safe truncation for log display. Never slices inside a multi-byte char.
/// If the input exceeds `max_bytes`, returns an escaped, truncated string with an ellipsis.
pub fn truncate_for_log(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return escape_log(input);
    }
    // Reserve 3 bytes for the ellipsis
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = escape_log(&input[..cut]);
    out.push_str("...");
    out
}

/// Split `text` into pieces of at most `max_bytes`, preferring to break after a newline
/// in the second half of a piece. A single char wider than `max_bytes` becomes its own piece.
pub fn chunk_utf8(text: &str, max_bytes: usize) -> Vec<String> {
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_bytes {
            chunks.push(remaining.to_string());
            break;
        }
        let mut end = max_bytes.min(remaining.len());
        while end > 0 && !remaining.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = remaining.chars().next().map(char::len_utf8).unwrap_or(remaining.len());
        }
        let slice = &remaining[..end];
        if let Some(pos) = slice.rfind('\n') {
            if pos > 0 && pos + 1 >= end / 2 {
                chunks.push(slice[..=pos].to_string());
                remaining = &remaining[pos + 1..];
                continue;
            }
        }
        chunks.push(slice.to_string());
        remaining = &remaining[end..];
    }
    chunks
}
