//! Text canonicalization.
//!
//! Rules, applied in order:
//! - lowercase
//! - `&` becomes ` and `, `+` becomes ` plus `
//! - `.` `,` `/` `–` `—` `-` become a space
//! - whitespace runs become a single `_`
//! - anything outside `[a-z0-9_]` is dropped
//! - repeated `_` collapse, leading and trailing `_` are trimmed
//!
//! The output alphabet is `[a-z0-9_]`, so the function is idempotent.

/// Canonicalize a display name into a comparison-stable key.
///
/// # Examples
///
/// ```
/// use taxon_normalize::normalize;
///
/// assert_eq!(normalize("C++"), "c_plus_plus");
/// assert_eq!(normalize("  Node.js / Express "), "node_js_express");
/// assert_eq!(normalize("R&D"), "r_and_d");
/// ```
pub fn normalize(input: &str) -> String {
    let mut spaced = String::with_capacity(input.len() + 8);
    for ch in input.to_lowercase().chars() {
        match ch {
            '&' => spaced.push_str(" and "),
            '+' => spaced.push_str(" plus "),
            '.' | ',' | '/' | '\u{2013}' | '\u{2014}' | '-' => spaced.push(' '),
            other => spaced.push(other),
        }
    }

    let mut key = String::with_capacity(spaced.len());
    let mut in_whitespace = false;
    for ch in spaced.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                push_underscore(&mut key);
                in_whitespace = true;
            }
            continue;
        }
        in_whitespace = false;
        if ch == '_' {
            push_underscore(&mut key);
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            key.push(ch);
        }
    }

    while key.ends_with('_') {
        key.pop();
    }
    key
}

/// Key over `"{name}_{category}"` when a category is present.
pub fn normalize_with_category(name: &str, category: Option<&str>) -> String {
    match category.map(str::trim).filter(|c| !c.is_empty()) {
        Some(category) => normalize(&format!("{name}_{category}")),
        None => normalize(name),
    }
}

// Leading underscores and runs are never emitted.
fn push_underscore(key: &mut String) {
    if !key.is_empty() && !key.ends_with('_') {
        key.push('_');
    }
}
