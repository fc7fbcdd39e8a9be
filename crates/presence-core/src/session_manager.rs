use chrono::{DateTime, Duration, Local, NaiveDate};
use presence_storage::{
    duration_from_secs, local_midnight, metadata_keys as keys, seconds_between, Database,
    SessionRecord,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::clock::{Clock, SystemClock};

/// A start within this many milliseconds of the previous start is treated as a duplicate trigger
pub const START_DEBOUNCE_MS: i64 = 1000;

/// Most time an open session may carry into a new day at rollover
pub const MAX_ROLLOVER_CARRY_SECS: f64 = 600.0;

/// Key for the instant from which the open session counts toward `today_total`
const CURRENT_SESSION_COUNTED_FROM: &str = "current_session_counted_from";

#[derive(Debug, Default)]
struct State {
    current_session: Option<DateTime<Local>>,
    /// Start of the part of the open session not yet added to `today_total`.
    /// Equal to `current_session` unless a rollover carried part of it over.
    counted_from: Option<DateTime<Local>>,
    today_total: f64,
    last_update_date: Option<NaiveDate>,
    last_persist: Option<DateTime<Local>>,
}

/// Owns the single open session and the running daily total
///
/// Every method takes the same lock, so calls from the daemon loop, the IPC
/// handler and the CLI never interleave.
pub struct SessionManager {
    database: Arc<Database>,
    clock: Arc<dyn Clock>,
    persist_interval: Duration,
    state: Mutex<State>,
}

impl SessionManager {
    /// Create a session manager on the system clock and load persisted state
    #[must_use]
    pub fn new(database: Arc<Database>, persist_interval: std::time::Duration) -> Self {
        Self::with_clock(database, Arc::new(SystemClock), persist_interval)
    }

    /// Create a session manager with an explicit clock and load persisted state
    #[must_use]
    pub fn with_clock(
        database: Arc<Database>,
        clock: Arc<dyn Clock>,
        persist_interval: std::time::Duration,
    ) -> Self {
        let manager = Self {
            database,
            clock,
            persist_interval: Duration::from_std(persist_interval)
                .unwrap_or_else(|_| Duration::seconds(30)),
            state: Mutex::new(State::default()),
        };
        manager.load_state();
        manager
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    /// Start of the open session, if any
    #[must_use]
    pub fn current_session(&self) -> Option<DateTime<Local>> {
        self.lock().current_session
    }

    #[must_use]
    pub fn today_total(&self) -> Duration {
        duration_from_secs(self.lock().today_total)
    }

    /// `today_total` plus the part of the open session not yet counted, limited to today
    #[must_use]
    pub fn today_total_with_open(&self) -> Duration {
        let state = self.lock();
        let now = self.clock.now();
        let running = state.counted_from.map_or(0.0, |counted| {
            let from = counted.max(local_midnight(now.date_naive()));
            seconds_between(from, now).max(0.0)
        });
        duration_from_secs(state.today_total + running)
    }

    #[must_use]
    pub fn last_update_date(&self) -> Option<NaiveDate> {
        self.lock().last_update_date
    }

    /// Open a new session at now, closing any open one first.
    ///
    /// Returns `false` when the call was swallowed by the debounce window.
    pub fn start_session(&self) -> bool {
        let mut state = self.lock();
        let now = self.clock.now();

        if let Some(start) = state.current_session {
            if now.signed_duration_since(start) < Duration::milliseconds(START_DEBOUNCE_MS) {
                log::info!("Ignoring duplicate session start (session opened at {start})");
                return false;
            }
            self.close_locked(&mut state, now, now);
        }

        state.current_session = Some(now);
        state.counted_from = Some(now);
        log::info!("Session started at {now}");
        self.persist_locked(&mut state, now, true);
        true
    }

    /// Close the open session at now and return its length
    pub fn end_session(&self) -> Option<Duration> {
        let mut state = self.lock();
        let now = self.clock.now();
        if state.current_session.is_none() {
            log::warn!("Attempted to end session, but no session was started");
            return None;
        }
        let duration = self.close_locked(&mut state, now, now);
        self.persist_locked(&mut state, now, true);
        duration
    }

    /// Close the open session at `end` instead of now (e.g. the last tick before a suspend).
    ///
    /// An `end` before the session start is clamped to the start. The session only
    /// counts toward `today_total` when `end` falls on the current day; otherwise the
    /// rollover carry-over is responsible for today's share.
    pub fn end_session_at(&self, end: DateTime<Local>) -> Option<Duration> {
        let mut state = self.lock();
        let now = self.clock.now();
        let Some(start) = state.current_session else {
            log::warn!("Attempted to end session at {end}, but no session was started");
            return None;
        };

        let end = if end < start {
            log::warn!("end_session_at({end}) is before session start {start}; clamping");
            start
        } else {
            end
        };

        let duration = self.close_locked(&mut state, end, now);
        self.persist_locked(&mut state, now, true);
        duration
    }

    /// Drop the open session without recording it (stale state after a cold boot)
    pub fn discard_session(&self) -> Option<DateTime<Local>> {
        let mut state = self.lock();
        let now = self.clock.now();
        let stale = state.current_session.take();
        state.counted_from = None;
        if let Some(start) = stale {
            log::info!("Discarded stale session started at {start}");
            self.persist_locked(&mut state, now, true);
        }
        stale
    }

    /// Reset `today_total` when the local date has moved past `last_update_date`.
    ///
    /// Returns `true` when a rollover happened.
    pub fn check_day_rollover(&self) -> bool {
        let mut state = self.lock();
        let now = self.clock.now();
        let today = now.date_naive();
        if state.last_update_date == Some(today) {
            return false;
        }

        log::info!("New day detected ({today}). Recalculating today_total");
        state.today_total = 0.0;
        let midnight = local_midnight(today);

        // Open session from before midnight carries at most MAX_ROLLOVER_CARRY_SECS.
        if let (Some(start), Some(counted)) = (state.current_session, state.counted_from) {
            if start < midnight && counted < midnight {
                let since_midnight = seconds_between(midnight, now).max(0.0);
                let carried = since_midnight.min(MAX_ROLLOVER_CARRY_SECS);
                if carried < since_midnight {
                    log::info!(
                        "Capped overlap from ongoing session at {carried:.0}s ({since_midnight:.0}s since midnight, likely slept)"
                    );
                } else {
                    log::info!("Added overlap from ongoing session: {carried:.0}s");
                }
                state.today_total += carried;
                state.counted_from = Some(now);
            }
        }

        match self.database.most_recent_session() {
            Ok(Some(previous)) if previous.end > midnight => {
                let overlap = seconds_between(midnight.max(previous.start), previous.end);
                state.today_total += overlap.max(0.0);
                log::info!("Added overlap from previous session: {overlap:.0}s");
            }
            Ok(_) => {}
            Err(e) => log::error!("Failed to read previous session during rollover: {e}"),
        }

        state.last_update_date = Some(today);
        self.persist_locked(&mut state, now, true);
        true
    }

    /// Write state to the store, unless a write happened within the persist interval.
    ///
    /// Returns `false` only when a write was attempted and failed.
    pub fn save_state(&self, force: bool) -> bool {
        let mut state = self.lock();
        let now = self.clock.now();
        self.persist_locked(&mut state, now, force)
    }

    /// Replace in-memory state with what the store holds
    pub fn load_state(&self) {
        let mut state = self.lock();
        let db = &self.database;

        state.today_total = db
            .get_metadata(keys::TODAY_TOTAL, "0")
            .parse::<f64>()
            .map_or(0.0, |t| t.max(0.0));

        let last_date = db.get_metadata(keys::LAST_UPDATE_DATE, "");
        state.last_update_date = if last_date.is_empty() {
            None
        } else {
            match last_date.parse::<NaiveDate>() {
                Ok(date) => Some(date),
                Err(e) => {
                    log::error!("Failed to parse last_update_date {last_date:?}: {e}");
                    None
                }
            }
        };

        state.current_session = parse_timestamp(&db.get_metadata(keys::CURRENT_SESSION, ""));
        state.counted_from = state.current_session.map(|start| {
            parse_timestamp(&db.get_metadata(CURRENT_SESSION_COUNTED_FROM, ""))
                .map_or(start, |counted| counted.max(start))
        });

        log::debug!(
            "Loaded state: today_total={:.0}s, last_update_date={:?}, current_session={:?}",
            state.today_total,
            state.last_update_date,
            state.current_session
        );
    }

    /// Clear in-memory totals and the open session; wiping the store is the caller's job
    pub fn reset(&self) {
        let mut state = self.lock();
        state.today_total = 0.0;
        state.current_session = None;
        state.counted_from = None;
        state.last_update_date = None;
        state.last_persist = None;
        log::info!("Session state reset");
    }

    /// Remember when the daemon last saw the machine running
    pub fn record_last_seen(&self, at: DateTime<Local>) -> bool {
        self.database
            .set_metadata(keys::LAST_SEEN_TIME, &at.to_rfc3339())
    }

    #[must_use]
    pub fn last_seen(&self) -> Option<DateTime<Local>> {
        parse_timestamp(&self.database.get_metadata(keys::LAST_SEEN_TIME, ""))
    }

    /// Close the open session at `end`, append it to the log and update totals
    fn close_locked(
        &self,
        state: &mut State,
        end: DateTime<Local>,
        now: DateTime<Local>,
    ) -> Option<Duration> {
        let start = state.current_session.take()?;
        let counted_from = state.counted_from.take().unwrap_or(start);
        let record = SessionRecord::new(start, end);
        let (end, duration_secs) = (record.end, record.duration_seconds);

        if !self.database.insert_session(&record) {
            log::error!("Failed to save session from {start} to {end}; keeping totals in memory");
        }

        if end.date_naive() == now.date_naive() {
            state.today_total += seconds_between(counted_from.min(end), end).max(0.0);
        } else {
            log::info!("Session ended on {}, leaving today's total to rollover", end.date_naive());
        }

        log::info!("Session ended at {end} (duration: {duration_secs:.0}s)");
        Some(record.duration())
    }

    fn persist_locked(&self, state: &mut State, now: DateTime<Local>, force: bool) -> bool {
        if !force {
            if let Some(last) = state.last_persist {
                if now.signed_duration_since(last) < self.persist_interval {
                    return true;
                }
            }
        }

        let db = &self.database;
        let session = state.current_session.map(|t| t.to_rfc3339()).unwrap_or_default();
        let counted = state.counted_from.map(|t| t.to_rfc3339()).unwrap_or_default();
        let date = state
            .last_update_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        let saved = db.set_metadata(keys::TODAY_TOTAL, &state.today_total.to_string())
            & db.set_metadata(keys::LAST_UPDATE_DATE, &date)
            & db.set_metadata(keys::CURRENT_SESSION, &session)
            & db.set_metadata(CURRENT_SESSION_COUNTED_FROM, &counted);

        if saved {
            state.last_persist = Some(now);
        } else {
            log::error!("Failed to save state to database");
        }
        saved
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    if raw.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Local)),
        Err(e) => {
            log::error!("Failed to parse timestamp {raw:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 1, day, hour, minute, second)
            .unwrap()
    }

    fn manager_at(start: DateTime<Local>) -> (SessionManager, ManualClock, Arc<Database>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let clock = ManualClock::new(start);
        let manager = SessionManager::with_clock(
            db.clone(),
            Arc::new(clock.clone()),
            std::time::Duration::from_secs(30),
        );
        // Settle the day so tests start from a known total
        manager.check_day_rollover();
        (manager, clock, db)
    }

    fn approx(a: Duration, b: Duration) -> bool {
        (a - b).num_milliseconds().abs() <= 1
    }

    #[test]
    fn test_start_then_end_adds_duration_to_today() {
        let (manager, clock, db) = manager_at(at(10, 9, 0, 0));
        let before = manager.today_total();

        assert!(manager.start_session());
        clock.advance(Duration::minutes(25));
        let duration = manager.end_session().unwrap();

        assert!(approx(duration, Duration::minutes(25)));
        assert!(approx(manager.today_total() - before, duration));
        assert!(manager.current_session().is_none());

        let saved = db.most_recent_session().unwrap().unwrap();
        assert_eq!(saved.start, at(10, 9, 0, 0));
        assert_eq!(saved.end, at(10, 9, 25, 0));
    }

    #[test]
    fn test_end_without_session_is_noop() {
        let (manager, _clock, db) = manager_at(at(10, 9, 0, 0));
        let before = manager.today_total();

        assert!(manager.end_session().is_none());
        assert!(manager.end_session_at(at(10, 8, 0, 0)).is_none());

        assert_eq!(manager.today_total(), before);
        assert!(manager.current_session().is_none());
        assert!(db.all_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_start_while_open_closes_previous() {
        let (manager, clock, db) = manager_at(at(10, 9, 0, 0));

        manager.start_session();
        clock.advance(Duration::minutes(5));
        assert!(manager.start_session());

        assert_eq!(manager.current_session(), Some(at(10, 9, 5, 0)));
        let sessions = db.all_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].end, at(10, 9, 5, 0));
    }

    #[test]
    fn test_rapid_start_is_debounced() {
        let (manager, clock, db) = manager_at(at(10, 9, 0, 0));

        assert!(manager.start_session());
        clock.advance(Duration::milliseconds(400));
        assert!(!manager.start_session());

        assert_eq!(manager.current_session(), Some(at(10, 9, 0, 0)));
        assert!(db.all_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_at_most_one_session_open() {
        let (manager, clock, db) = manager_at(at(10, 9, 0, 0));

        for _ in 0..5 {
            manager.start_session();
            clock.advance(Duration::seconds(3));
        }
        manager.end_session();
        manager.end_session();

        let sessions = db.all_sessions().unwrap();
        assert_eq!(sessions.len(), 5);
        for pair in sessions.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        assert!(manager.current_session().is_none());
    }

    #[test]
    fn test_end_session_at_before_start_clamps_to_zero() {
        let (manager, clock, db) = manager_at(at(10, 9, 0, 0));
        manager.start_session();
        clock.advance(Duration::minutes(1));

        let duration = manager.end_session_at(at(10, 8, 30, 0)).unwrap();

        assert_eq!(duration, Duration::zero());
        let saved = db.most_recent_session().unwrap().unwrap();
        assert_eq!(saved.start, saved.end);
        assert!(saved.duration_seconds >= 0.0);
    }

    #[test]
    fn test_end_session_at_excludes_gap() {
        let (manager, clock, _db) = manager_at(at(10, 9, 0, 0));
        let before = manager.today_total();
        manager.start_session();
        clock.advance(Duration::hours(2));

        let duration = manager.end_session_at(at(10, 9, 30, 0)).unwrap();

        assert!(approx(duration, Duration::minutes(30)));
        assert!(approx(manager.today_total() - before, Duration::minutes(30)));
    }

    #[test]
    fn test_end_session_at_on_previous_day_leaves_total_alone() {
        let (manager, clock, _db) = manager_at(at(10, 23, 0, 0));
        manager.start_session();
        clock.set(at(11, 7, 0, 0));
        assert!(manager.check_day_rollover());
        let after_rollover = manager.today_total();

        manager.end_session_at(at(10, 23, 40, 0)).unwrap();

        assert_eq!(manager.today_total(), after_rollover);
    }

    #[test]
    fn test_rollover_counts_only_post_midnight_overlap_of_saved_session() {
        let db = Arc::new(Database::in_memory().unwrap());
        assert!(db.insert_session(&SessionRecord::new(at(9, 23, 58, 0), at(10, 0, 2, 0))));
        db.set_metadata(keys::TODAY_TOTAL, "100");
        db.set_metadata(keys::LAST_UPDATE_DATE, "2024-01-09");

        let clock = ManualClock::new(at(10, 8, 0, 0));
        let manager =
            SessionManager::with_clock(db, Arc::new(clock), std::time::Duration::from_secs(30));
        assert!(approx(manager.today_total(), Duration::seconds(100)));

        assert!(manager.check_day_rollover());

        assert!(approx(manager.today_total(), Duration::minutes(2)));
        assert_eq!(manager.last_update_date(), Some(at(10, 0, 0, 0).date_naive()));
    }

    #[test]
    fn test_rollover_caps_open_session_carry_over() {
        let (manager, clock, _db) = manager_at(at(10, 22, 0, 0));
        manager.start_session();

        clock.set(at(11, 3, 0, 0));
        assert!(manager.check_day_rollover());

        assert!(approx(manager.today_total(), Duration::seconds(600)));
    }

    #[test]
    fn test_rollover_carries_short_overlap_in_full() {
        let (manager, clock, _db) = manager_at(at(10, 23, 50, 0));
        manager.start_session();

        clock.set(at(11, 0, 4, 0));
        manager.check_day_rollover();

        assert!(approx(manager.today_total(), Duration::minutes(4)));

        // The carried slice is not counted again when the session ends
        clock.set(at(11, 0, 10, 0));
        manager.end_session();
        assert!(approx(manager.today_total(), Duration::minutes(10)));
    }

    #[test]
    fn test_rollover_only_once_per_day() {
        let (manager, clock, _db) = manager_at(at(10, 9, 0, 0));
        manager.start_session();
        clock.advance(Duration::minutes(10));
        manager.end_session();
        let total = manager.today_total();

        assert!(!manager.check_day_rollover());
        assert_eq!(manager.today_total(), total);
        assert!(manager.today_total() >= Duration::zero());
    }

    #[test]
    fn test_state_survives_reload() {
        let (manager, clock, db) = manager_at(at(10, 9, 0, 0));
        manager.start_session();
        clock.advance(Duration::minutes(3));
        manager.end_session();
        manager.start_session();

        let reloaded = SessionManager::with_clock(
            db,
            Arc::new(clock),
            std::time::Duration::from_secs(30),
        );
        assert_eq!(reloaded.current_session(), Some(at(10, 9, 3, 0)));
        assert!(approx(reloaded.today_total(), Duration::minutes(3)));
        assert_eq!(reloaded.last_update_date(), Some(at(10, 0, 0, 0).date_naive()));
    }

    #[test]
    fn test_failed_writes_still_close_session_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presence.db");
        let clock = ManualClock::new(at(10, 9, 0, 0));
        {
            let writable = SessionManager::with_clock(
                Arc::new(Database::new(path.clone()).unwrap()),
                Arc::new(clock.clone()),
                std::time::Duration::from_secs(30),
            );
            writable.check_day_rollover();
            assert!(writable.start_session());
        }

        let db = Arc::new(Database::open_read_only(&path).unwrap());
        let manager = SessionManager::with_clock(
            db.clone(),
            Arc::new(clock.clone()),
            std::time::Duration::from_secs(30),
        );
        assert_eq!(manager.current_session(), Some(at(10, 9, 0, 0)));
        let before = manager.today_total();

        clock.advance(Duration::minutes(20));
        let duration = manager.end_session().unwrap();

        assert!(approx(duration, Duration::minutes(20)));
        assert!(manager.current_session().is_none());
        assert!(approx(manager.today_total() - before, Duration::minutes(20)));
        assert!(db.all_sessions().unwrap().is_empty());
        assert!(!manager.save_state(true));
    }

    #[test]
    fn test_non_forced_saves_are_rate_limited() {
        let (manager, clock, db) = manager_at(at(10, 9, 0, 0));
        manager.start_session();
        db.set_metadata(keys::CURRENT_SESSION, "");

        clock.advance(Duration::seconds(10));
        assert!(manager.save_state(false));
        assert_eq!(db.get_metadata(keys::CURRENT_SESSION, ""), "");

        clock.advance(Duration::seconds(25));
        assert!(manager.save_state(false));
        assert_ne!(db.get_metadata(keys::CURRENT_SESSION, ""), "");
    }

    #[test]
    fn test_reset_clears_memory_state() {
        let (manager, clock, _db) = manager_at(at(10, 9, 0, 0));
        manager.start_session();
        clock.advance(Duration::minutes(2));
        manager.end_session();
        manager.start_session();

        manager.reset();

        assert!(manager.current_session().is_none());
        assert_eq!(manager.today_total(), Duration::zero());
        assert!(manager.last_update_date().is_none());
    }

    #[test]
    fn test_discard_session_records_nothing() {
        let (manager, clock, db) = manager_at(at(10, 9, 0, 0));
        manager.start_session();
        clock.advance(Duration::hours(1));

        assert_eq!(manager.discard_session(), Some(at(10, 9, 0, 0)));
        assert!(manager.current_session().is_none());
        assert!(db.all_sessions().unwrap().is_empty());
        assert_eq!(db.get_metadata(keys::CURRENT_SESSION, "x"), "");
    }

    #[test]
    fn test_last_seen_round_trip() {
        let (manager, _clock, _db) = manager_at(at(10, 9, 0, 0));
        assert!(manager.last_seen().is_none());
        assert!(manager.record_last_seen(at(10, 9, 15, 0)));
        assert_eq!(manager.last_seen(), Some(at(10, 9, 15, 0)));
    }

    #[test]
    fn test_today_total_with_open_session() {
        let (manager, clock, _db) = manager_at(at(10, 9, 0, 0));
        manager.start_session();
        clock.advance(Duration::minutes(10));
        manager.end_session();
        manager.start_session();
        clock.advance(Duration::minutes(5));

        assert!(approx(manager.today_total(), Duration::minutes(10)));
        assert!(approx(manager.today_total_with_open(), Duration::minutes(15)));
    }

    #[test]
    fn test_today_total_with_open_after_rollover() {
        let (manager, clock, _db) = manager_at(at(10, 23, 50, 0));
        manager.start_session();
        clock.set(at(11, 0, 4, 0));
        manager.check_day_rollover();
        clock.set(at(11, 0, 9, 0));

        // 4 carried at rollover plus 5 running since
        assert!(approx(manager.today_total_with_open(), Duration::minutes(9)));
    }
}
