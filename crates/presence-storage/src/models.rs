use chrono::{DateTime, Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// A closed presence session, as persisted in the session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub duration_seconds: f64,
}

impl SessionRecord {
    /// Build a record from its bounds, clamping an inverted interval to zero length
    #[must_use]
    pub fn new(start: DateTime<Local>, end: DateTime<Local>) -> Self {
        let end = end.max(start);
        Self {
            start,
            end,
            duration_seconds: seconds_between(start, end),
        }
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        duration_from_secs(self.duration_seconds)
    }

    /// Local calendar day the session started on
    #[must_use]
    pub fn start_day(&self) -> NaiveDate {
        self.start.date_naive()
    }
}

/// Fractional seconds from `start` to `end`
#[must_use]
pub fn seconds_between(start: DateTime<Local>, end: DateTime<Local>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let micros = end
        .signed_duration_since(start)
        .num_microseconds()
        .unwrap_or(0) as f64;
    micros / 1_000_000.0
}

/// Fractional seconds as a `Duration`, to the microsecond
#[must_use]
pub fn duration_from_secs(secs: f64) -> Duration {
    #[allow(clippy::cast_possible_truncation)]
    Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_clamps_inverted_interval() {
        let start = Local.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let end = Local.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();

        let record = SessionRecord::new(start, end);
        assert_eq!(record.end, start);
        assert!(record.duration_seconds.abs() < f64::EPSILON);
    }

    #[test]
    fn test_duration_matches_bounds() {
        let start = Local.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let end = start + Duration::minutes(45);

        let record = SessionRecord::new(start, end);
        assert!((record.duration_seconds - 2700.0).abs() < 1e-9);
        assert_eq!(record.duration(), Duration::minutes(45));
        assert_eq!(record.start_day(), start.date_naive());
    }

    #[test]
    fn test_duration_from_secs_keeps_sub_second_part() {
        assert_eq!(duration_from_secs(1.5), Duration::milliseconds(1500));
        assert_eq!(duration_from_secs(0.000_25), Duration::microseconds(250));
        assert_eq!(duration_from_secs(0.0), Duration::zero());
    }
}
