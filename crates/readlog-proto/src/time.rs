//! Time bound normalization for historical reads.
//!
//! Browsers send either `YYYY-MM-DD HH:MM:SS` (typed by hand) or
//! `YYYY-MM-DDTHH:MM` (a `datetime-local` input). Both are wall-clock times
//! on the host running the server, the same way `journalctl --since`
//! interprets them, and are converted to a UTC instant here.

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Naive layouts accepted from the client, most specific first.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A parsed time bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeBound {
    /// A recognized timestamp.
    Instant(DateTime<Utc>),
    /// An unrecognized value, rewritten to look like an ISO-8601 UTC string.
    Literal(String),
}

impl TimeBound {
    /// Parse a raw bound. Returns `None` for an empty value.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(Self::Instant(ts.with_timezone(&Utc)));
        }

        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                if let Some(local) = Local.from_local_datetime(&naive).earliest() {
                    return Some(Self::Instant(local.with_timezone(&Utc)));
                }
            }
        }

        let mut literal = raw.replace(' ', "T");
        if !literal.ends_with('Z') {
            literal.push('Z');
        }
        Some(Self::Literal(literal))
    }

    /// The bound as a UTC ISO-8601 string.
    #[must_use]
    pub fn to_utc_string(&self) -> String {
        match self {
            Self::Instant(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
            Self::Literal(s) => s.clone(),
        }
    }

    /// The bound as UNIX seconds, if it can be expressed as one.
    #[must_use]
    pub fn unix_seconds(&self) -> Option<i64> {
        match self {
            Self::Instant(ts) => Some(ts.timestamp()),
            Self::Literal(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| ts.timestamp()),
        }
    }
}
