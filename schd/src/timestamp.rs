//! RFC 3339 wire format for schedule timestamps.
//!
//! Accepted shape: `YYYY-MM-DDTHH:MM:SS` followed by `Z` or `±HH:MM`, no
//! fractional seconds. Stored form keeps the caller's offset and always
//! spells it numerically, so `Z` becomes `+00:00`. An input is accepted
//! only if formatting its parsed value reproduces it exactly (with `Z`
//! read as `+00:00`).

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

/// Parse a schedule timestamp, rejecting anything that does not round-trip.
pub fn parse_strict(input: &str) -> Option<DateTime<FixedOffset>> {
    let parsed = DateTime::parse_from_rfc3339(input).ok()?;
    let canonical = format(&parsed);

    let round_trips = canonical == input
        || input
            .strip_suffix('Z')
            .is_some_and(|head| canonical.strip_suffix("+00:00") == Some(head));

    round_trips.then_some(parsed)
}

/// Canonical stored form.
pub fn format(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Canonical stored form of a UTC instant (used for `read_ts`).
pub fn format_utc(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}
