use crate::errors::{AppError, AppResult};
use std::collections::HashSet;

const MAX_NUMERIC_SUFFIX: u32 = 9_999;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdScheme {
    /// `prefix-A` through `prefix-Z`.
    Alphabetic,
    /// `prefix-1` upwards.
    Numeric,
    /// `prefix`, then `prefix 1`, `prefix 2`, ...
    Labelled,
}

pub fn next_id(prefix: &str, scheme: IdScheme, used: &HashSet<String>) -> AppResult<String> {
    let candidate = match scheme {
        IdScheme::Alphabetic => ('A'..='Z')
            .map(|letter| format!("{prefix}-{letter}"))
            .find(|id| !used.contains(id)),
        IdScheme::Numeric => (1..=MAX_NUMERIC_SUFFIX)
            .map(|n| format!("{prefix}-{n}"))
            .find(|id| !used.contains(id)),
        IdScheme::Labelled => std::iter::once(prefix.to_string())
            .chain((1..=MAX_NUMERIC_SUFFIX).map(|n| format!("{prefix} {n}")))
            .find(|id| !used.contains(id)),
    };

    candidate.ok_or_else(|| {
        AppError::Capacity(format!(
            "no free identifier left for prefix '{prefix}' ({} in use)",
            used.len()
        ))
    })
}

/// Strips the internal `prefix-` from an id for display.
pub fn display_label<'a>(id: &'a str, prefix: &str) -> &'a str {
    id.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(id)
}

pub fn shorten_label(label: &str, max_chars: usize) -> String {
    // truncating only pays off when the ellipsis makes the text shorter
    if label.chars().count() > max_chars + ELLIPSIS.len() {
        let mut short = label.chars().take(max_chars).collect::<String>();
        short.push_str(ELLIPSIS);
        short
    } else {
        label.to_string()
    }
}
