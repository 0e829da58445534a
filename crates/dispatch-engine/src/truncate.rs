/// Largest char boundary in `text` that is `<= max_bytes`.
pub fn floor_boundary(text: &str, max_bytes: usize) -> usize {
    if max_bytes >= text.len() {
        return text.len();
    }
    let mut boundary = max_bytes;
    while !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

/// Truncate to at most `max_bytes`, cutting at a line break when one is
/// close, and append a marker showing how much was dropped.
pub fn truncate_with_marker(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let boundary = floor_boundary(text, max_bytes);
    let head = &text[..boundary];
    let cut = match head.rfind('\n') {
        Some(pos) if pos >= boundary / 2 => pos,
        _ => boundary,
    };
    format!(
        "{}\n[truncated: {} of {} bytes omitted]",
        head[..cut].trim_end(),
        text.len() - cut,
        text.len()
    )
}
