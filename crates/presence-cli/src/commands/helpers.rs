//! Formatting helpers shared by the CLI commands

use chrono::{DateTime, Duration, Local};

/// `2h 05m` for an hour or more, `5m` below that
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes().max(0);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m")
    }
}

pub fn format_time(dt: DateTime<Local>) -> String {
    dt.format("%H:%M").to_string()
}

pub fn format_date(dt: DateTime<Local>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_duration_minutes_only() {
        assert_eq!(format_duration(Duration::seconds(59)), "0m");
        assert_eq!(format_duration(Duration::minutes(45)), "45m");
    }

    #[test]
    fn test_format_duration_hours() {
        assert_eq!(format_duration(Duration::minutes(60)), "1h 00m");
        assert_eq!(format_duration(Duration::minutes(125)), "2h 05m");
    }

    #[test]
    fn test_format_duration_negative_is_zero() {
        assert_eq!(format_duration(Duration::minutes(-3)), "0m");
    }

    #[test]
    fn test_format_time_and_date() {
        let dt = Local.with_ymd_and_hms(2024, 2, 9, 7, 4, 0).unwrap();
        assert_eq!(format_time(dt), "07:04");
        assert_eq!(format_date(dt), "2024-02-09");
    }
}
