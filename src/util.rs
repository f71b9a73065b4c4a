//! Shared text helpers.

/// Cut `text` to at most `max_chars` characters, appending `suffix` when cut.
///
/// The suffix counts toward the limit, so the result never exceeds it.
pub fn truncate_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(suffix.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(suffix);
    out
}

/// First line of `text`, bounded to `max_chars`.
pub fn first_line(text: &str, max_chars: usize) -> String {
    truncate_chars(text.lines().next().unwrap_or("").trim(), max_chars, "…")
}

/// Render a duration in whole seconds as `1h 2m`, `3m 4s` or `5s`.
pub fn format_secs(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
