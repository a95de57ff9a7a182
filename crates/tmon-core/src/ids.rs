//! Chat id encodings.
//!
//! Telegram exposes the same supergroup/channel under three textual forms:
//! - full: `-1001234567890` (canonical here)
//! - short: `-1234567890`
//! - bare: `1234567890`
//!
//! The watch set is keyed by the full form; everything that touches it goes
//! through `normalize` first, and `is_monitored` tolerates keys written in the
//! short form by older builds.

use crate::domain::MonitoredSet;

const FULL_PREFIX: &str = "-100";

/// Map any textual chat id to the canonical `-100<digits>` form.
pub fn normalize(id: &str) -> String {
    if id.starts_with(FULL_PREFIX) {
        return id.to_string();
    }
    if let Some(rest) = id.strip_prefix('-') {
        return format!("{FULL_PREFIX}{rest}");
    }
    format!("{FULL_PREFIX}{id}")
}

/// Short (`-<digits>`) form of a chat id.
pub fn short_form(id: &str) -> String {
    normalize(id).replace(FULL_PREFIX, "-")
}

/// Look `id` up in the watch set under each of its known encodings.
///
/// Returns the key that matched, so callers can operate on the stored entry
/// rather than on their own spelling of it.
pub fn is_monitored(set: &MonitoredSet, id: &str) -> Option<String> {
    candidate_keys(id).into_iter().find(|k| set.contains_key(k))
}

fn candidate_keys(id: &str) -> Vec<String> {
    let canonical = normalize(id);
    let mut out: Vec<String> = Vec::with_capacity(3);
    for candidate in [id.to_string(), canonical.replace(FULL_PREFIX, "-"), canonical] {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// One spelling of a chat id handed to the platform resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdVariant {
    /// The id string exactly as stored/requested (may also be a `@username`).
    Original(String),
    /// The same string parsed as an integer.
    Numeric(i64),
    /// `-100<digits>` rewritten to `-<digits>`, as an integer.
    Short(i64),
}

impl std::fmt::Display for IdVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdVariant::Original(s) => write!(f, "original {s}"),
            IdVariant::Numeric(n) => write!(f, "numeric {n}"),
            IdVariant::Short(n) => write!(f, "short {n}"),
        }
    }
}

/// Ordered list of spellings to try when resolving `id`.
///
/// Fixed order: original, numeric, short. Inapplicable variants are skipped.
pub fn resolution_variants(id: &str) -> Vec<IdVariant> {
    let mut out = vec![IdVariant::Original(id.to_string())];

    if is_signed_digits(id) {
        if let Ok(n) = id.parse::<i64>() {
            out.push(IdVariant::Numeric(n));
        }
    }

    if let Some(rest) = id.strip_prefix(FULL_PREFIX) {
        if is_digits(rest) {
            if let Ok(n) = format!("-{rest}").parse::<i64>() {
                out.push(IdVariant::Short(n));
            }
        }
    }

    out
}

/// Integer form of an id as the Bot API expects it (`-100...` for channels).
pub fn to_bot_api_id(id: &str) -> Option<i64> {
    normalize(id).parse::<i64>().ok()
}

fn is_signed_digits(s: &str) -> bool {
    is_digits(s.strip_prefix('-').unwrap_or(s))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
