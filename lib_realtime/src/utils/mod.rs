//! # Utilities Module
//!
//! Small helpers shared by the protocol and the connection manager.

use chrono::{DateTime, SecondsFormat, Utc};

/// Returns the current UTC time as an ISO-8601 string with millisecond
/// precision and a `Z` suffix, e.g. `2024-07-01T12:30:05.123Z`.
pub fn now_iso8601() -> String {
    format_iso8601(Utc::now())
}

/// Formats `at` the same way [`now_iso8601`] does.
pub fn format_iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
