//! Compact text helpers shared by notifications and CLI surfaces.

/// Maximum characters kept in a notification preview.
pub const PREVIEW_CHARS: usize = 200;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Trimmed body prefix stored on notifications.
pub fn preview(body: &str) -> String {
    body.trim().chars().take(PREVIEW_CHARS).collect()
}

/// Comma-joined list, or `-` when empty.
pub fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}
