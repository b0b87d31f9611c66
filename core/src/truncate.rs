/// Truncates `text` to at most `max_chars` characters, replacing the removed
/// middle with an ellipsis so both the head and the tail stay visible.
pub(crate) fn truncate_middle(text: &str, max_chars: usize) -> String {
    const MARKER: char = '…';

    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    if max_chars <= 1 {
        return MARKER.to_string();
    }

    // The marker itself counts toward the budget; the head gets the odd char.
    let keep = max_chars - 1;
    let head = keep - keep / 2;
    let tail = keep / 2;

    let mut out = String::with_capacity(text.len().min(max_chars * 4));
    out.extend(text.chars().take(head));
    out.push(MARKER);
    out.extend(text.chars().skip(total - tail));
    out
}
