use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::Database;
use crate::ModelError;
use crate::models::format_utc;

impl Database {
    /// Load the serialized data bag for a live session token. Expired rows
    /// are filtered in the query and treated as absent.
    pub fn load_session(&self, token: &str) -> Result<Option<String>, ModelError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT data FROM sessions WHERE token = ?1 AND expiry > ?2",
                params![token, format_utc(Utc::now())],
                |row| row.get(0),
            )
            .optional()
            .map_err(ModelError::from)
        })
    }

    pub fn save_session(
        &self,
        token: &str,
        data: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), ModelError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sessions (token, data, expiry)
                 VALUES (?1, ?2, ?3)",
                params![token, data, format_utc(expiry)],
            )?;
            Ok(())
        })
    }

    pub fn delete_session(&self, token: &str) -> Result<(), ModelError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
            Ok(())
        })
    }

    /// Sweep rows whose expiry has passed. Called at startup; live traffic
    /// never reads expired rows regardless.
    pub fn delete_expired_sessions(&self) -> Result<usize, ModelError> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM sessions WHERE expiry <= ?1",
                params![format_utc(Utc::now())],
            )?;
            Ok(removed)
        })
    }
}
