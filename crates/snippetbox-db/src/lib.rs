pub mod error;
pub mod migrations;
pub mod models;
mod sessions;
mod snippets;
mod users;

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::info;

pub use error::ModelError;
pub use models::{Snippet, User};

/// How many physical connections the pool may hold. WAL mode lets reads run
/// in parallel; writes are still serialised by SQLite's page lock.
const POOL_SIZE: u32 = 8;

#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, ModelError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(Duration::from_secs(5))
        });

        let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;

        migrations::run(&*pool.get()?)?;

        info!("database opened at {}", path.display());
        Ok(Self { pool })
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, ModelError>
    where
        F: FnOnce(&Connection) -> Result<T, ModelError>,
    {
        let conn = self.pool.get()?;
        f(&conn)
    }
}
