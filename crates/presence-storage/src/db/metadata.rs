use rusqlite::{params, OptionalExtension};

use super::Database;

/// Well-known metadata keys
pub mod keys {
    pub const TODAY_TOTAL: &str = "today_total";
    pub const LAST_UPDATE_DATE: &str = "last_update_date";
    pub const CURRENT_SESSION: &str = "current_session";
    pub const LAST_SEEN_TIME: &str = "last_seen_time";
}

impl Database {
    /// Read a metadata value, falling back to `default` when missing or unreadable
    #[must_use]
    pub fn get_metadata(&self, key: &str, default: &str) -> String {
        let result = self
            .conn()
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional();

        match result {
            Ok(Some(value)) => {
                log::debug!("Metadata fetched: {key} = {value}");
                value
            }
            Ok(None) => default.to_string(),
            Err(e) => {
                log::error!("Failed to get metadata '{key}': {e}");
                default.to_string()
            }
        }
    }

    /// Upsert a metadata value. Returns `false` (and logs) on failure.
    pub fn set_metadata(&self, key: &str, value: &str) -> bool {
        let result = self.conn().execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        );

        match result {
            Ok(_) => {
                log::debug!("Metadata set: {key} = {value}");
                true
            }
            Err(e) => {
                log::error!("Failed to set metadata '{key}': {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_returns_default() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.get_metadata("nope", "fallback"), "fallback");
    }

    #[test]
    fn test_last_write_wins() {
        let db = Database::in_memory().unwrap();
        assert!(db.set_metadata(keys::TODAY_TOTAL, "10"));
        assert!(db.set_metadata(keys::TODAY_TOTAL, "20"));
        assert_eq!(db.get_metadata(keys::TODAY_TOTAL, "0"), "20");
    }
}
