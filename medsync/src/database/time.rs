//! Timestamp helpers for the database layer.
//!
//! Instants (sync start/finish, token expiry) are stored as `INTEGER` Unix
//! epoch milliseconds (UTC). Clinical record dates are calendar dates stored
//! as `YYYY-MM-DD` text, because that is what the dedup keys compare.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a `DateTime<Utc>` to Unix epoch milliseconds.
#[inline]
pub fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`.
///
/// Out-of-range values fall back to the Unix epoch instead of panicking.
#[inline]
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).earliest().unwrap_or_default()
}

/// Reduce a FHIR `date`/`dateTime`/`instant` string to its `YYYY-MM-DD` part.
///
/// Returns `None` for values that do not start with a valid calendar date.
/// Partial FHIR dates (`2024` or `2024-05`) are rejected: they cannot serve
/// as a stable dedup key.
pub fn calendar_date(value: &str) -> Option<String> {
    let head = value.trim().split('T').next()?;
    let date = NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()?;
    Some(date.format("%Y-%m-%d").to_string())
}
