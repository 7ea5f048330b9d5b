//! Shared text helpers.

/// Shorten `s` to `max_chars` characters, marking the cut with `…`.
///
/// Counts characters rather than bytes so excerpts of non-ASCII text keep a
/// comparable length.
pub fn excerpt(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim();
    match trimmed.char_indices().nth(max_chars) {
        None => trimmed.to_string(),
        Some((cut, _)) => format!("{}…", trimmed[..cut].trim_end()),
    }
}

/// Strip a surrounding markdown code fence (```json ... ```), if present.
pub fn strip_code_fence(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}
