//! Identifier-safe names derived from free-form labels.

const MAX_LEN: usize = 64;
const FALLBACK: &str = "unnamed";

/// Lower-case, strip parenthetical annotations, collapse everything outside
/// `[a-z0-9]` into single underscores. Total and idempotent.
pub fn sanitize(label: impl AsRef<str>) -> String {
    let lower = label.as_ref().to_lowercase();
    let mut out = String::with_capacity(lower.len().min(MAX_LEN * 2));
    let mut depth = 0usize;
    let mut gap = false;
    for ch in lower.chars() {
        match ch {
            '(' => {
                depth += 1;
                gap = true;
            }
            ')' if depth > 0 => {
                depth -= 1;
                gap = true;
            }
            _ if depth > 0 => {}
            'a'..='z' | '0'..='9' => {
                if gap && !out.is_empty() {
                    out.push('_');
                }
                gap = false;
                out.push(ch);
            }
            _ => gap = true,
        }
    }
    // ASCII only from here on, so byte truncation is safe.
    out.truncate(MAX_LEN);
    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() { FALLBACK.to_string() } else { trimmed.to_string() }
}
