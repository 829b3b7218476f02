//! Locale-ambiguous number parsing.
//!
//! Invoice exports mix `1,234.56`, `1 234,56`, `1.234,56` and `1234.56`,
//! sometimes within one file. [`parse_number`] resolves every token with the
//! same fixed rule order, so a given input always yields the same value.
//! It is pure and total: no logging, no panics, `None` for anything that is
//! not a finite number.

use once_cell::sync::Lazy;
use regex::Regex;

/// Digit groups of 1-3 separated by commas, optional dot decimal part.
static COMMA_GROUPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(,\d{3})*(\.\d+)?$").expect("static pattern"));

const CURRENCY_SYMBOLS: &[char] = &[
    '€', '$', '£', '¥', '₣', '₤', '₹', '¢', '₽', '₩', '₺', '₿', '¤',
];

const NO_BREAK_SPACE: char = '\u{00A0}';
const NARROW_NO_BREAK_SPACE: char = '\u{202F}';

/// Parse a text token into a finite `f64`, or `None` if it is not numeric.
pub fn parse_number(token: &str) -> Option<f64> {
    if token.trim().is_empty() {
        return None;
    }

    let compact: String = token
        .chars()
        .filter(|c| !matches!(*c, ' ' | NO_BREAK_SPACE | NARROW_NO_BREAK_SPACE) && !c.is_whitespace())
        .collect();

    let (negative, body) = strip_adornments(&compact)?;
    let normalized = disambiguate_separators(body);

    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Split off one optional sign and currency symbols on either side.
///
/// Accepts `-€12`, `€-12`, `12€` and `-12 €`. A second sign, or anything
/// else that is not a digit or separator, makes the token unparsable.
fn strip_adornments(token: &str) -> Option<(bool, &str)> {
    let mut body = token.trim_start_matches(CURRENCY_SYMBOLS);
    let mut negative = false;

    if let Some(rest) = body.strip_prefix('-') {
        negative = true;
        body = rest;
    } else if let Some(rest) = body.strip_prefix('+') {
        body = rest;
    }
    body = body
        .trim_start_matches(CURRENCY_SYMBOLS)
        .trim_end_matches(CURRENCY_SYMBOLS);

    let is_numeric_body = !body.is_empty()
        && body.chars().any(|c| c.is_ascii_digit())
        && body.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.');
    if is_numeric_body {
        Some((negative, body))
    } else {
        None
    }
}

/// Rewrite separators so that the result uses a single `.` decimal point.
fn disambiguate_separators(body: &str) -> String {
    let commas = body.matches(',').count();
    let dots = body.matches('.').count();

    if COMMA_GROUPED.is_match(body) {
        return body.replace(',', "");
    }
    if commas == 1 && dots == 0 {
        return body.replace(',', ".");
    }
    if commas > 0 && dots > 0 && body.rfind(',') > body.rfind('.') {
        // 1.234,56: dots group thousands, comma is the decimal
        return body.replace('.', "").replacen(',', ".", 1).replace(',', "");
    }
    if dots > 1 {
        let cleaned = body.replace(',', "");
        if let Some((head, last)) = cleaned.rsplit_once('.') {
            return format!("{}.{}", head.replace('.', ""), last);
        }
    }
    body.replace(',', "")
}
