//! Text helpers for plugin key derivation.

/// Converts a file-stem style name to camelCase.
///
/// Hyphens, underscores, and spaces are treated as word separators; the
/// character following a separator is uppercased, all other characters are
/// kept as written, and the leading character is lowercased.
pub fn to_camel_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut upper_next = false;

    for c in text.chars() {
        if c == '-' || c == '_' || c == ' ' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else if out.is_empty() {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}
