//! SQLite store for the session log and the metadata key/value table.

pub mod helpers;
mod metadata;
mod sessions;

pub use metadata::keys as metadata_keys;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::migrations;

/// Database connection wrapper
///
/// The connection sits behind a mutex so one handle can be shared between the
/// daemon loop, the IPC handler and CLI callers.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if database directory creation, connection opening, or schema initialization fails
    pub fn new(path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path).context("Failed to open database connection")?;
        migrations::init_schema(&conn)?;

        log::info!("Database initialized at: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing database file without write access
    ///
    /// Every write through this handle fails and is reported by the writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Failed to open {} read-only", path.display()))?;
        log::debug!("Database opened read-only at: {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a throwaway in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        migrations::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove every session and metadata entry
    ///
    /// # Errors
    ///
    /// Returns an error if either delete statement fails
    pub fn reset(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM sessions", [])?;
        conn.execute("DELETE FROM metadata", [])?;
        log::info!("Database reset: all sessions and metadata removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionRecord;
    use chrono::{Duration, Local};

    #[test]
    fn test_file_database_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("presence.db");

        {
            let db = Database::new(path.clone()).unwrap();
            assert!(db.set_metadata("today_total", "42.5"));
        }

        let db = Database::new(path.clone()).unwrap();
        assert_eq!(db.get_metadata("today_total", "0"), "42.5");
        drop(db);

        let read_only = Database::open_read_only(&path).unwrap();
        assert_eq!(read_only.get_metadata("today_total", "0"), "42.5");
        assert!(!read_only.set_metadata("today_total", "7"));
        assert_eq!(read_only.get_metadata("today_total", "0"), "42.5");
    }

    #[test]
    fn test_read_only_open_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Database::open_read_only(&dir.path().join("missing.db")).is_err());
    }

    #[test]
    fn test_reset_clears_sessions_and_metadata() {
        let db = Database::in_memory().unwrap();
        let start = Local::now() - Duration::hours(1);
        assert!(db.insert_session(&SessionRecord::new(start, Local::now())));
        assert!(db.set_metadata("current_session", "x"));

        db.reset().unwrap();

        assert!(db.all_sessions().unwrap().is_empty());
        assert_eq!(db.get_metadata("current_session", ""), "");
    }
}
