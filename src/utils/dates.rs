//! Flexible date parsing for ledger exports.
//!
//! Ledger transactions arrive from several upstream pipelines that never
//! agreed on a date format, so the raw value is kept as text and parsed on
//! demand. Every component that needs a transaction date goes through
//! [`parse_flexible`] so filtering, ordering, and scoring all see the same
//! interpretation of the same string.

use chrono::{NaiveDate, NaiveDateTime};

/// Formats tried in order. The timestamp form comes first so a full
/// timestamp is never half-consumed by a bare date format, and `%m/%d/%Y`
/// is tried before `%d/%m/%Y` because US-style exports dominate the ledger.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d", "%d/%m/%Y"];

/// Parse a raw transaction date, returning `None` when no known format
/// matches. Callers treat `None` as "date unusable", not as an error.
pub fn parse_flexible(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed.date());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }

    None
}
