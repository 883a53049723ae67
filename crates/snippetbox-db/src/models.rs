use chrono::{DateTime, NaiveDateTime, Utc};

use crate::ModelError;

/// Timestamps are stored as UTC text in this format so that lexical
/// comparison in SQL matches chronological order.
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn format_utc(t: DateTime<Utc>) -> String {
    t.format(DATETIME_FORMAT).to_string()
}

pub(crate) fn parse_utc(s: &str) -> Result<DateTime<Utc>, ModelError> {
    Ok(NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)?.and_utc())
}

#[derive(Debug, Clone)]
pub struct Snippet {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

/// User profile as exposed to handlers. The password hash never leaves the
/// model layer.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created: DateTime<Utc>,
}
