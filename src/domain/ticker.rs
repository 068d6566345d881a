//! Ticker canonicalization.
//!
//! Tickers arrive from several sources (config, broker catalog, fund
//! pages) with inconsistent casing, a trailing `@` on some listings and
//! the occasional legacy alias. Everything that compares tickers goes
//! through here.

/// Legacy spellings mapped to their current ticker.
const ALIASES: &[(&str, &str)] = &[("TRAY", "TPAY")];

/// Canonical form: trimmed, one trailing `@` stripped, upper-cased,
/// aliases applied. Empty input (including a bare `@`) is treated as
/// missing.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_suffix('@').unwrap_or(trimmed);
    if stripped.is_empty() {
        return None;
    }
    let upper = stripped.to_uppercase();
    let canonical = ALIASES
        .iter()
        .find(|(from, _)| *from == upper)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or(upper);
    Some(canonical)
}

/// Compare two raw tickers by their canonical forms. Missing tickers
/// never match anything, not even each other.
pub fn equal(a: &str, b: &str) -> bool {
    match (normalize(a), normalize(b)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}
