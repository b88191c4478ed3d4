// src/utils.rs
use std::time::Duration;

/// Truncate to at most `max` characters, never splitting a character.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Horizontal bar for pattern counts, capped at `max_width` cells.
pub fn frequency_bar(count: usize, max_width: usize) -> String {
    "▪".repeat(count.min(max_width))
}

/// Format a duration the way people read it in chat: `850ms`, `42.1s`, `3m 05s`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1_000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}
