use rusqlite::Connection;
use tracing::info;

use crate::ModelError;

pub fn run(conn: &Connection) -> Result<(), ModelError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS snippets (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT NOT NULL,
            content     TEXT NOT NULL,
            created     TEXT NOT NULL,
            expires     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_snippets_created
            ON snippets(created);

        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL,
            email           TEXT NOT NULL UNIQUE,
            hashed_password TEXT NOT NULL,
            created         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            token       TEXT PRIMARY KEY,
            data        TEXT NOT NULL,
            expiry      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_expiry
            ON sessions(expiry);
        ",
    )?;

    info!("database migrations complete");
    Ok(())
}
