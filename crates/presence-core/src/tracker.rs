use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local};
use presence_storage::{duration_from_secs, seconds_between, Database, SessionRecord};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, sync::Arc};

use crate::{config::Config, session_manager::SessionManager};

/// The open session as seen at `now`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSession {
    pub start: DateTime<Local>,
    pub now: DateTime<Local>,
    pub duration_seconds: f64,
}

impl CurrentSession {
    #[must_use]
    pub fn duration(&self) -> Duration {
        duration_from_secs(self.duration_seconds)
    }
}

/// Aggregates over the session log
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStats {
    pub days_tracked: usize,
    pub total_today: Duration,
    pub total_yesterday: Duration,
    pub seven_day_average: Duration,
    pub weekday_average: Duration,
    pub overall_average: Duration,
    pub sessions: Vec<SessionRecord>,
}

/// Entry point for callers that act on presence data outside the daemon loop
pub struct Tracker {
    session_manager: Arc<SessionManager>,
}

impl Tracker {
    #[must_use]
    pub fn new(session_manager: Arc<SessionManager>) -> Self {
        Self { session_manager }
    }

    /// Open the configured database and bring the daily total up to date
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened
    pub fn open(config: &Config, data_dir: &Path) -> Result<Self> {
        let db_path = config.storage.resolve_db_path(data_dir);
        let database = Database::new(db_path.clone())
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        let manager = SessionManager::new(Arc::new(database), config.storage.persist_interval());
        manager.check_day_rollover();
        Ok(Self::new(Arc::new(manager)))
    }

    /// Open the configured database for reading alongside a running daemon
    ///
    /// No rollover is run and nothing is written; the daemon owns the stored state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database file is missing or cannot be opened
    pub fn open_read_only(config: &Config, data_dir: &Path) -> Result<Self> {
        let db_path = config.storage.resolve_db_path(data_dir);
        let database = Database::open_read_only(&db_path)?;
        let manager = SessionManager::new(Arc::new(database), config.storage.persist_interval());
        Ok(Self::new(Arc::new(manager)))
    }

    #[must_use]
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    fn database(&self) -> &Database {
        self.session_manager.database()
    }

    pub fn start_session(&self) -> bool {
        self.session_manager.start_session()
    }

    pub fn end_session(&self) -> Option<Duration> {
        self.session_manager.end_session()
    }

    #[must_use]
    pub fn current_session_info(&self) -> Option<CurrentSession> {
        let start = self.session_manager.current_session()?;
        let now = self.session_manager.now();
        Some(CurrentSession {
            start,
            now,
            duration_seconds: seconds_between(start, now).max(0.0),
        })
    }

    /// Most recently started closed session
    ///
    /// # Errors
    ///
    /// Returns an error if the session log cannot be read
    pub fn previous_session(&self) -> Result<Option<SessionRecord>> {
        self.database().most_recent_session()
    }

    #[must_use]
    pub fn today_total(&self) -> Duration {
        self.session_manager.today_total()
    }

    /// Today's total including the running part of the open session
    #[must_use]
    pub fn today_total_with_open(&self) -> Duration {
        self.session_manager.today_total_with_open()
    }

    /// Compute history statistics, optionally with the full session list
    ///
    /// # Errors
    ///
    /// Returns an error if the session log cannot be read
    pub fn history(&self, include_sessions: bool) -> Result<HistoryStats> {
        let db = self.database();
        let now = self.session_manager.now();
        let yesterday = now.date_naive().pred_opt().unwrap_or_else(|| now.date_naive());

        let total_yesterday = sum_seconds(&db.sessions_for_day(yesterday)?);

        let recent = db.sessions_since(now - Duration::days(7))?;
        let recent_days = recent
            .iter()
            .map(SessionRecord::start_day)
            .collect::<HashSet<_>>()
            .len();
        let seven_day_average = mean(sum_seconds(&recent), recent_days);

        let weekday_means: Vec<f64> = db
            .sessions_by_weekday()?
            .values()
            .filter(|durations| !durations.is_empty())
            .map(|durations| mean(durations.iter().sum(), durations.len()))
            .collect();
        let weekday_average = mean(weekday_means.iter().sum(), weekday_means.len());

        let all = db.all_sessions()?;
        let overall_average = mean(sum_seconds(&all), all.len());

        Ok(HistoryStats {
            days_tracked: db.distinct_day_count()?,
            total_today: self.today_total_with_open(),
            total_yesterday: duration_from_secs(total_yesterday),
            seven_day_average: duration_from_secs(seven_day_average),
            weekday_average: duration_from_secs(weekday_average),
            overall_average: duration_from_secs(overall_average),
            sessions: if include_sessions { all } else { Vec::new() },
        })
    }

    /// Wipe the store and the in-memory session state
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared
    pub fn reset(&self) -> Result<()> {
        self.database().reset()?;
        self.session_manager.reset();
        log::info!("All presence data has been reset");
        Ok(())
    }
}

fn sum_seconds(sessions: &[SessionRecord]) -> f64 {
    sessions.iter().map(|s| s.duration_seconds).sum()
}

#[allow(clippy::cast_precision_loss)]
fn mean(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}
