//! Shared utility functions used across multiple modules.

/// Current Unix timestamp in milliseconds.
pub fn unix_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Format a Unix millisecond timestamp as UTC, e.g. `2025-07-14 09:30:12`.
///
/// Out-of-range values fall back to the raw number so log lines and CLI
/// output never panic on garbage timestamps.
pub fn format_timestamp_ms(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |datetime| datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

/// Normalize an actor label by trimming whitespace.
///
/// Returns `None` when the trimmed value is empty.
pub fn normalize_actor(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
