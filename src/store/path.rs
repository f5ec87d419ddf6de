/// Turn an externally supplied name (product name, batch id) into a single
/// path component.
///
/// Separators, drive colons and characters Windows rejects become `_`, as
/// does a leading dot, so the result is never hidden and never `.`/`..`.
/// Trailing dots and spaces are dropped and an empty result becomes `_`.
pub(crate) fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .enumerate()
        .map(|(i, c)| match c {
            '.' if i == 0 => '_',
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim_end_matches(['.', ' ']);
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}
