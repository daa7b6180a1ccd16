use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{Error, Result};

/// Jira's native instant format: millisecond precision, numeric offset
/// without a colon (`2024-01-01T09:00:00.000-0500`).
pub const REMOTE_INSTANT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Parse an instant as the tracker sends it.
///
/// Formats are tried in a fixed order and the first match wins:
/// 1. millisecond precision with numeric offset (`…T09:00:00.000-0500`)
/// 2. millisecond precision, `Z` or numeric offset (`…T09:00:00.000Z`)
/// 3. RFC 3339 (`…T09:00:00-05:00`)
/// 4. RFC 3339 with arbitrary fractional seconds (`…T09:00:00.123456789-05:00`)
///
/// The recorded offset is preserved; nothing is converted to UTC.
pub fn parse_remote_instant(value: &str) -> Result<DateTime<FixedOffset>> {
    let s = value.trim();

    if let Ok(dt) = DateTime::parse_from_str(s, REMOTE_INSTANT_FORMAT) {
        return Ok(dt);
    }
    if let Some(naive) = s.strip_suffix('Z') {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.3f") {
            return Ok(Utc.from_utc_datetime(&ndt).fixed_offset());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%:z") {
        return Ok(dt);
    }

    Err(Error::TimestampParse {
        value: value.to_string(),
    })
}

/// Format an instant the way the tracker expects it on worklog creation.
pub fn format_remote_instant(instant: &DateTime<FixedOffset>) -> String {
    instant.format(REMOTE_INSTANT_FORMAT).to_string()
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| Error::DateParse(format!("{value}: {e} (expected YYYY-MM-DD)")))
}

/// UTC midnight at the start of `date`.
pub fn start_of_day_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Half-open instant range `[start 00:00Z, (end + 1 day) 00:00Z)` covering
/// both calendar dates in full.
pub fn inclusive_day_bounds(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        start_of_day_utc(start),
        start_of_day_utc(end) + Duration::days(1),
    )
}
