/// History and reset command handlers
use anyhow::Result;
use presence_core::HistoryStats;
use presence_storage::SessionRecord;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tabled::{Table, Tabled};

use super::daemon::daemon_client;
use super::helpers::{format_date, format_duration, format_time};
use super::session::{open_tracker, open_tracker_read_only};

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

impl From<&SessionRecord> for SessionRow {
    fn from(session: &SessionRecord) -> Self {
        Self {
            date: format_date(session.start),
            from: format_time(session.start),
            to: format_time(session.end),
            duration: format_duration(session.duration()),
        }
    }
}

fn summary_lines(stats: &HistoryStats) -> Vec<String> {
    vec![
        format!("Days tracked: {}", stats.days_tracked),
        format!("Total today: {}", format_duration(stats.total_today)),
        format!("Total yesterday: {}", format_duration(stats.total_yesterday)),
        format!("7-day average: {}", format_duration(stats.seven_day_average)),
        format!("Weekday average: {}", format_duration(stats.weekday_average)),
        format!("Overall average: {}", format_duration(stats.overall_average)),
    ]
}

pub fn show_history(data_dir: &Path, with_sessions: bool) -> Result<()> {
    let tracker = if daemon_client(data_dir).is_some() {
        open_tracker_read_only(data_dir)?
    } else {
        open_tracker(data_dir)?
    };
    let stats = tracker.history(with_sessions)?;

    for line in summary_lines(&stats) {
        println!("{line}");
    }

    if with_sessions {
        if stats.sessions.is_empty() {
            println!("\nNo previous sessions.");
        } else {
            let rows: Vec<SessionRow> = stats.sessions.iter().map(SessionRow::from).collect();
            let table = Table::new(rows).to_string();
            println!("\n{table}");
        }
    }
    Ok(())
}

fn confirmed(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub fn reset(data_dir: &Path, yes: bool) -> Result<()> {
    if daemon_client(data_dir).is_some() {
        println!("The daemon is running. Stop it with 'presence daemon stop' before resetting.");
        return Ok(());
    }

    if !yes {
        print!("Are you sure you want to delete all sessions and totals? This cannot be undone. [y/N] ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !confirmed(&answer) {
            println!("Reset cancelled.");
            return Ok(());
        }
    }

    open_tracker(data_dir)?.reset()?;
    println!("Database has been reset.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local, TimeZone};

    #[test]
    fn test_confirmation_answers() {
        assert!(confirmed("y\n"));
        assert!(confirmed(" YES "));
        assert!(!confirmed("\n"));
        assert!(!confirmed("nope"));
    }

    #[test]
    fn test_session_row_formatting() {
        let start = Local.with_ymd_and_hms(2024, 6, 3, 9, 5, 0).unwrap();
        let session = SessionRecord::new(start, start + Duration::minutes(95));
        let row = SessionRow::from(&session);
        assert_eq!(row.date, "2024-06-03");
        assert_eq!(row.from, "09:05");
        assert_eq!(row.to, "10:40");
        assert_eq!(row.duration, "1h 35m");
    }

    #[test]
    fn test_summary_lines() {
        let stats = HistoryStats {
            days_tracked: 3,
            total_today: Duration::minutes(50),
            total_yesterday: Duration::hours(2),
            seven_day_average: Duration::minutes(80),
            weekday_average: Duration::minutes(70),
            overall_average: Duration::minutes(72),
            sessions: Vec::new(),
        };
        let lines = summary_lines(&stats);
        assert_eq!(lines[0], "Days tracked: 3");
        assert_eq!(lines[1], "Total today: 50m");
        assert_eq!(lines[2], "Total yesterday: 2h 00m");
        assert_eq!(lines[3], "7-day average: 1h 20m");
    }
}
