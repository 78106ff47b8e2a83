use std::time::Duration;

use chrono::{DateTime, Local, Utc};

/// Whole seconds left, floored: `"7s"`, `"0s"` once the deadline has passed
pub fn format_remaining(remaining: Duration) -> String {
    format!("{}s", remaining.as_secs())
}

/// Wall-clock time in the local zone, e.g. `"14:03:27"`
pub fn format_clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
