/// Character budget for any title derived from message text.
pub const TITLE_BUDGET: usize = 80;

pub const ELLIPSIS: &str = "...";

/// Collapse whitespace and cut `text` to at most `budget` characters (plus the
/// ellipsis marker), breaking between words. A single word longer than the
/// whole budget is the only case that gets cut mid-word.
pub fn truncate_title(text: &str, budget: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= budget {
        return collapsed;
    }

    let head: String = collapsed.chars().take(budget).collect();
    let ends_on_boundary = collapsed.chars().nth(budget) == Some(' ');

    let kept = if ends_on_boundary {
        head.as_str()
    } else {
        match head.rfind(' ') {
            Some(idx) if idx > 0 => &head[..idx],
            _ => head.as_str(),
        }
    };

    format!("{}{}", kept.trim_end(), ELLIPSIS)
}
