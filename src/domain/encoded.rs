//! Delimited-text encoding for many-valued attributes stored in one column.
//!
//! Two policies share the same wire form:
//!
//! - **set policy** (tag names on a post): [`encode_set`] drops duplicates and
//!   order carries no meaning.
//! - **list policy** (post ids on a tag): [`append`] and [`remove`] edit the
//!   stored text in place, keeping insertion order.
//!
//! Identifiers must not contain [`DELIMITER`]; nothing is escaped.

use std::collections::HashSet;

pub const DELIMITER: char = ',';

/// Split an encoded field into its identifiers, skipping blank tokens left by
/// stray delimiters.
pub fn decode(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(DELIMITER)
        .filter(|token| !token.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Join identifiers keeping their order.
pub fn encode<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for value in values {
        if !out.is_empty() {
            out.push(DELIMITER);
        }
        out.push_str(value.as_ref());
    }
    out
}

/// Join identifiers once each; the first occurrence wins.
pub fn encode_set<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let unique: Vec<String> = values
        .into_iter()
        .map(|value| value.as_ref().to_string())
        .filter(|value| !value.trim().is_empty() && seen.insert(value.clone()))
        .collect();
    encode(unique)
}

pub fn contains(text: &str, id: &str) -> bool {
    text.split(DELIMITER).any(|token| token == id)
}

/// Append `id` unless it is already present. Returns whether `text` changed.
pub fn append(text: &mut String, id: &str) -> bool {
    if id.trim().is_empty() || contains(text, id) {
        return false;
    }
    if !text.is_empty() {
        text.push(DELIMITER);
    }
    text.push_str(id);
    true
}

/// Remove the first occurrence of `id`. Returns whether `text` changed.
///
/// Other tokens, blank ones included, are kept verbatim so that an
/// [`append`] followed by a `remove` of the same id restores the original text.
pub fn remove(text: &mut String, id: &str) -> bool {
    let mut tokens: Vec<&str> = text.split(DELIMITER).collect();
    let Some(position) = tokens.iter().position(|token| *token == id) else {
        return false;
    };
    tokens.remove(position);
    *text = tokens.join(&DELIMITER.to_string());
    true
}
