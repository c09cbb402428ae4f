//! Time helpers
//!
//! All persisted timestamps are UTC. Tenant timezones are applied only when
//! translating a local calendar day into a UTC window.

use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

/// Current UTC time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Storage format: RFC 3339, UTC, microsecond precision
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp
pub fn parse_optional(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

/// Start of the UTC hour containing `ts`
pub fn hour_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(ts)
}

/// Optimistic-concurrency stamp strictly after `previous`
///
/// Two writes inside the same clock tick must still produce distinct stamps,
/// otherwise a compare-and-swap could match a row it should not.
pub fn next_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let current = now();
    let floor = previous + Duration::microseconds(1);
    if current > floor {
        current
    } else {
        floor
    }
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::Validation(format!("Unknown timezone '{}'", name)))
}

/// UTC window `[start, end)` covering `date` in the given timezone
pub fn local_day_bounds(tz: Tz, date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let next = date
        .succ_opt()
        .ok_or_else(|| Error::Validation(format!("Date out of range: {}", date)))?;
    Ok((local_day_start(tz, date)?, local_day_start(tz, next)?))
}

/// First instant of a local day; skips forward over a DST gap at midnight
fn local_day_start(tz: Tz, date: NaiveDate) -> Result<DateTime<Utc>> {
    for hour in 0..4 {
        let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
            continue;
        };
        if let Some(local) = tz.from_local_datetime(&naive).earliest() {
            return Ok(local.with_timezone(&Utc));
        }
    }
    Err(Error::Internal(format!("No valid local midnight for {} in {}", date, tz)))
}
