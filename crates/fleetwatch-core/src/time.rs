//! Timestamp helpers shared by every record type.

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, SubsecRound, Utc};

use crate::{Error, Result};

/// The current time truncated to millisecond precision, the resolution every
/// stored timestamp uses.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(3) }

/// Render `dt` as an ISO 8601 string with milliseconds and a `Z` suffix,
/// e.g. `2025-03-01T12:30:45.123Z`.
pub fn iso_millis(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a date bound supplied by a client.
///
/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates. A bare date
/// resolves to the start of that day, or to its last millisecond when
/// `end_of_day` is set.
pub fn parse_bound(input: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
  let input = input.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
    return Ok(dt.with_timezone(&Utc));
  }
  let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
    .map_err(|_| Error::Validation(format!("invalid date: {input:?}")))?;
  let time = if end_of_day {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
  } else {
    NaiveTime::from_hms_opt(0, 0, 0)
  };
  let time = time.ok_or_else(|| Error::Validation("invalid time of day".into()))?;
  Ok(date.and_time(time).and_utc())
}
