//! Article key canonicalization.
//!
//! Upstream systems zero-pad article codes inconsistently (`0000001234567`
//! vs `1234567`). Keys are canonicalized identically on the billing and the
//! reference side so the join compares equal values.

/// Strip leading zeros from an all-digit key, keeping at least one digit.
/// Non-numeric keys pass through unchanged apart from surrounding whitespace.
pub fn normalize_article_key(raw: &str) -> String {
    let key = raw.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_digit()) {
        return key.to_string();
    }
    let stripped = key.trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

/// Normalize every key of a column in place.
pub fn normalize_article_keys<'a, I>(keys: I)
where
    I: IntoIterator<Item = &'a mut String>,
{
    for key in keys {
        *key = normalize_article_key(key);
    }
}
