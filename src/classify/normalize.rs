//! Set label normalization.

/// Turn a raw label into a stable set key.
///
/// Lowercases, drops everything outside `[a-z0-9 _-]`, turns spaces and
/// hyphens into underscores and collapses underscore runs. Surrounding
/// whitespace is trimmed last; at that point spaces are already gone, so
/// leading or trailing underscores survive (`"(x)-"` becomes `"x_"`).
pub fn normalize(label: &str) -> String {
    let kept: String = label
        .to_ascii_lowercase()
        .chars()
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | ' ' | '_' | '-'))
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();

    let mut collapsed = String::with_capacity(kept.len());
    for c in kept.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed.trim().to_string()
}
