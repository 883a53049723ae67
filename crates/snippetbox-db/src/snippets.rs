use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension, Row, params};

use crate::Database;
use crate::ModelError;
use crate::models::{Snippet, format_utc, parse_utc};

/// Raw row before the timestamp columns are parsed.
type RawSnippet = (i64, String, String, String, String);

fn raw_snippet(row: &Row<'_>) -> rusqlite::Result<RawSnippet> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn into_snippet(raw: RawSnippet) -> Result<Snippet, ModelError> {
    let (id, title, content, created, expires) = raw;
    Ok(Snippet {
        id,
        title,
        content,
        created: parse_utc(&created)?,
        expires: parse_utc(&expires)?,
    })
}

impl Database {
    /// Insert a new snippet and return its id. `created` and `expires` are
    /// derived from a single UTC instant so the lifetime is exactly
    /// `expires_days` days.
    pub fn insert_snippet(
        &self,
        title: &str,
        content: &str,
        expires_days: i64,
    ) -> Result<i64, ModelError> {
        let created = Utc::now();
        let expires = created + Duration::days(expires_days);

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO snippets (title, content, created, expires)
                 VALUES (?1, ?2, ?3, ?4)",
                params![title, content, format_utc(created), format_utc(expires)],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Fetch a single non-expired snippet. The expiry filter is part of the
    /// lookup predicate, so an expired id is indistinguishable from one that
    /// never existed.
    pub fn get_snippet(&self, id: i64) -> Result<Snippet, ModelError> {
        let raw = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, content, created, expires FROM snippets
                 WHERE expires > ?1 AND id = ?2",
                params![format_utc(Utc::now()), id],
                raw_snippet,
            )
            .optional()
            .map_err(ModelError::from)
        })?;

        match raw {
            Some(raw) => into_snippet(raw),
            None => Err(ModelError::NoRecord),
        }
    }

    /// The 10 most recently created non-expired snippets, newest first.
    pub fn latest_snippets(&self) -> Result<Vec<Snippet>, ModelError> {
        let raws = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, content, created, expires FROM snippets
                 WHERE expires > ?1 ORDER BY id DESC LIMIT 10",
            )?;

            let rows = stmt
                .query_map(params![format_utc(Utc::now())], raw_snippet)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })?;

        raws.into_iter().map(into_snippet).collect()
    }
}
