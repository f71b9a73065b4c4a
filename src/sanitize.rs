//! Cleaning of text that ends up as command-line arguments (PR title/body).

use crate::util::truncate_chars;

pub const MAX_TITLE_CHARS: usize = 120;
/// GitHub rejects bodies over 65536 characters.
pub const MAX_BODY_CHARS: usize = 60_000;

const TITLE_FORBIDDEN: &[char] = &['`', '$', ';', '|', '&', '<', '>', '\\'];

/// Single line, no shell metacharacters, no control characters.
pub fn sanitize_title(title: &str) -> String {
    let line = title.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let cleaned: String = line
        .chars()
        .filter(|c| !c.is_control() && !TITLE_FORBIDDEN.contains(c))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, MAX_TITLE_CHARS, "…")
}

/// Keeps newlines and tabs; defuses `$(...)` and backticks.
pub fn sanitize_body(body: &str) -> String {
    let cleaned: String = body
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .map(|c| if c == '`' { '\'' } else { c })
        .collect();
    truncate_chars(&cleaned.replace("$(", "$ ("), MAX_BODY_CHARS, "\n…")
}
