//! ISO-8601 timestamp handling shared by the local store, the wire format
//! and the authority.
//!
//! Timestamps are kept at millisecond precision and written as
//! `2025-03-01T06:15:00.250Z`.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};

/// Current time truncated to milliseconds, so it survives a text round-trip.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn format(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses RFC 3339, falling back to the `YYYY-MM-DD HH:MM:SS[.fff]` form
/// relational stores emit for DATETIME columns (read as UTC).
pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(s.trim()) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| rfc_err),
    }
}

/// True when `a` and `b` are at most `window` apart, in either direction.
pub fn within(a: &DateTime<Utc>, b: &DateTime<Utc>, window: TimeDelta) -> bool {
    (*a - *b).abs() <= window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uses_millis_and_z() {
        let dt = parse("2025-03-01T06:15:00.250+00:00").unwrap();
        assert_eq!(format(&dt), "2025-03-01T06:15:00.250Z");
    }

    #[test]
    fn test_parse_accepts_offsets_and_sql_datetime() {
        let a = parse("2025-03-01T13:15:00+07:00").unwrap();
        let b = parse("2025-03-01 06:15:00").unwrap();
        assert_eq!(a, b);
        assert!(parse("yesterday").is_err());
    }

    #[test]
    fn test_now_round_trips_through_text() {
        let t = now();
        assert_eq!(parse(&format(&t)).unwrap(), t);
    }

    #[test]
    fn test_within_is_symmetric_and_inclusive() {
        let t = parse("2025-03-01T06:15:00.000Z").unwrap();
        let window = TimeDelta::seconds(2);
        assert!(within(&t, &(t + TimeDelta::milliseconds(1500)), window));
        assert!(within(&(t + TimeDelta::milliseconds(1500)), &t, window));
        assert!(within(&t, &(t + TimeDelta::seconds(2)), window));
        assert!(!within(&t, &(t + TimeDelta::seconds(3)), window));
    }
}
