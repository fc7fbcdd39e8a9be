//! Database helper functions for safe type conversions.

use chrono::{DateTime, Local, NaiveDate, SecondsFormat, TimeZone, Utc};
use rusqlite::types::Type;

/// Encode a timestamp for storage.
///
/// Timestamps are kept as fixed-width UTC RFC3339 strings so that lexical order
/// in SQL matches chronological order.
pub fn encode_datetime(dt: DateTime<Local>) -> String {
    dt.with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC3339 datetime string from database, returning a rusqlite error on failure.
pub fn parse_datetime(s: &str) -> rusqlite::Result<DateTime<Local>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Local midnight starting `day`.
///
/// Falls back to the earliest valid local time when midnight does not exist
/// (DST transitions at 00:00).
pub fn local_midnight(day: NaiveDate) -> DateTime<Local> {
    let naive = day.and_time(chrono::NaiveTime::MIN);
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_then_parse_keeps_instant() {
        let now = Local::now();
        let parsed = parse_datetime(&encode_datetime(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_encoded_strings_sort_chronologically() {
        let earlier = Local.with_ymd_and_hms(2024, 1, 9, 23, 0, 0).unwrap();
        let later = Local.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap();
        assert!(encode_datetime(earlier) < encode_datetime(later));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_datetime("not a date").is_err());
    }
}
