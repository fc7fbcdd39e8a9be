use anyhow::Result;
use chrono::{DateTime, Datelike, Days, Local, NaiveDate};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::{BTreeMap, HashSet};

use super::helpers::{encode_datetime, local_midnight, parse_datetime};
use super::Database;
use crate::models::SessionRecord;

const SESSION_COLUMNS: &str = "start_time, end_time, duration_seconds";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        start: parse_datetime(&row.get::<_, String>(0)?)?,
        end: parse_datetime(&row.get::<_, String>(1)?)?,
        duration_seconds: row.get(2)?,
    })
}

impl Database {
    /// Append a closed session to the log. Returns `false` (and logs) on failure.
    pub fn insert_session(&self, session: &SessionRecord) -> bool {
        let SessionRecord {
            start,
            end,
            duration_seconds,
        } = session;
        let result = self.conn().execute(
            "INSERT INTO sessions (start_time, end_time, duration_seconds) VALUES (?1, ?2, ?3)",
            params![encode_datetime(*start), encode_datetime(*end), duration_seconds],
        );

        match result {
            Ok(_) => {
                log::info!("Session saved: {start} - {end} (duration: {duration_seconds:.0}s)");
                true
            }
            Err(e) => {
                log::error!("Failed to save session {start} - {end}: {e}");
                false
            }
        }
    }

    fn query_sessions(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<SessionRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions {filter} ORDER BY start_time ASC"
        ))?;
        let sessions = stmt
            .query_map(args, session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Every recorded session, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn all_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.query_sessions("", &[])
    }

    /// Sessions that started at or after `since`
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn sessions_since(&self, since: DateTime<Local>) -> Result<Vec<SessionRecord>> {
        self.query_sessions("WHERE start_time >= ?1", &[&encode_datetime(since)])
    }

    /// Sessions that started on the given local calendar day
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn sessions_for_day(&self, day: NaiveDate) -> Result<Vec<SessionRecord>> {
        let from = local_midnight(day);
        let to = day
            .checked_add_days(Days::new(1))
            .map_or_else(|| from + chrono::Duration::days(1), local_midnight);
        self.query_sessions(
            "WHERE start_time >= ?1 AND start_time < ?2",
            &[&encode_datetime(from), &encode_datetime(to)],
        )
    }

    /// Session durations (seconds) grouped by local weekday of their start, 0 = Monday
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn sessions_by_weekday(&self) -> Result<BTreeMap<u32, Vec<f64>>> {
        let mut by_weekday: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for session in self.all_sessions()? {
            by_weekday
                .entry(session.start.weekday().num_days_from_monday())
                .or_default()
                .push(session.duration_seconds);
        }
        Ok(by_weekday)
    }

    /// The latest session by start time
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn most_recent_session(&self) -> Result<Option<SessionRecord>> {
        let conn = self.conn();
        let session = conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY start_time DESC, id DESC LIMIT 1"
                ),
                [],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// Number of distinct local days on which a session started
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn distinct_day_count(&self) -> Result<usize> {
        let days: HashSet<NaiveDate> = self
            .all_sessions()?
            .iter()
            .map(SessionRecord::start_day)
            .collect();
        Ok(days.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
        // 2024-01-01 is a Monday
        Local.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
    }

    fn seed(db: &Database, start: DateTime<Local>, minutes: i64) {
        let end = start + Duration::minutes(minutes);
        assert!(db.insert_session(&SessionRecord::new(start, end)));
    }

    #[test]
    fn test_all_sessions_ordered_by_start() {
        let db = Database::in_memory().unwrap();
        seed(&db, at(2, 14, 0), 30);
        seed(&db, at(1, 9, 0), 60);
        seed(&db, at(2, 8, 0), 15);

        let sessions = db.all_sessions().unwrap();
        let starts: Vec<_> = sessions.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![at(1, 9, 0), at(2, 8, 0), at(2, 14, 0)]);
    }

    #[test]
    fn test_sessions_for_day_uses_start_day() {
        let db = Database::in_memory().unwrap();
        seed(&db, at(1, 23, 50), 20); // crosses into Jan 2
        seed(&db, at(2, 10, 0), 30);
        seed(&db, at(3, 0, 5), 5);

        let day = at(2, 0, 0).date_naive();
        let sessions = db.sessions_for_day(day).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].start, at(2, 10, 0));
    }

    #[test]
    fn test_sessions_since() {
        let db = Database::in_memory().unwrap();
        seed(&db, at(1, 9, 0), 10);
        seed(&db, at(5, 9, 0), 10);

        let sessions = db.sessions_since(at(3, 0, 0)).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].start, at(5, 9, 0));
    }

    #[test]
    fn test_sessions_by_weekday_groups_durations() {
        let db = Database::in_memory().unwrap();
        seed(&db, at(1, 9, 0), 10); // Monday
        seed(&db, at(8, 9, 0), 20); // Monday
        seed(&db, at(3, 9, 0), 30); // Wednesday

        let grouped = db.sessions_by_weekday().unwrap();
        assert_eq!(grouped.get(&0), Some(&vec![600.0, 1200.0]));
        assert_eq!(grouped.get(&2), Some(&vec![1800.0]));
        assert!(!grouped.contains_key(&1));
    }

    #[test]
    fn test_most_recent_session() {
        let db = Database::in_memory().unwrap();
        assert!(db.most_recent_session().unwrap().is_none());

        seed(&db, at(1, 9, 0), 10);
        seed(&db, at(4, 9, 0), 25);
        seed(&db, at(2, 9, 0), 10);

        let latest = db.most_recent_session().unwrap().unwrap();
        assert_eq!(latest.start, at(4, 9, 0));
        assert_eq!(latest.end, at(4, 9, 25));
        assert!((latest.duration_seconds - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_distinct_day_count() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.distinct_day_count().unwrap(), 0);

        seed(&db, at(1, 9, 0), 10);
        seed(&db, at(1, 15, 0), 10);
        seed(&db, at(3, 9, 0), 10);

        assert_eq!(db.distinct_day_count().unwrap(), 2);
    }
}
