use argon2::password_hash::rand_core::OsRng;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash,
    password_hash::SaltString,
};
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::Database;
use crate::ModelError;
use crate::models::{User, format_utc, parse_utc};

fn hash_password(password: &str) -> Result<String, ModelError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(ModelError::PasswordHash)?;
    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored Argon2id hash. A mismatch is
/// invalid credentials; a malformed hash is an infrastructure error.
fn verify_password(password: &str, stored_hash: &str) -> Result<(), ModelError> {
    let parsed = PasswordHash::new(stored_hash).map_err(ModelError::PasswordHash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(()),
        Err(password_hash::Error::Password) => Err(ModelError::InvalidCredentials),
        Err(err) => Err(ModelError::PasswordHash(err)),
    }
}

fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    if let rusqlite::Error::SqliteFailure(code, Some(message)) = err {
        code.code == rusqlite::ErrorCode::ConstraintViolation && message.contains(column)
    } else {
        false
    }
}

impl Database {
    /// Create a user with an Argon2id-hashed password and return the new id.
    /// A unique-constraint violation on the email column maps to
    /// `ModelError::DuplicateEmail`.
    pub fn insert_user(&self, name: &str, email: &str, password: &str) -> Result<i64, ModelError> {
        let hashed = hash_password(password)?;

        self.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO users (name, email, hashed_password, created)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, email, hashed, format_utc(Utc::now())],
            );

            match result {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(err) if is_unique_violation(&err, "users.email") => {
                    Err(ModelError::DuplicateEmail)
                }
                Err(err) => Err(err.into()),
            }
        })
    }

    /// Return the user id for a matching email and password. Unknown email
    /// and wrong password both produce `ModelError::InvalidCredentials` so
    /// the two cases cannot be told apart by a caller probing for accounts.
    pub fn authenticate_user(&self, email: &str, password: &str) -> Result<i64, ModelError> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, hashed_password FROM users WHERE email = ?1",
                [email],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(ModelError::from)
        })?;

        let (id, stored_hash) = row.ok_or(ModelError::InvalidCredentials)?;
        verify_password(password, &stored_hash)?;
        Ok(id)
    }

    pub fn user_exists(&self, id: i64) -> Result<bool, ModelError> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                [id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Fetch profile fields for a user. The password hash is not included.
    pub fn get_user(&self, id: i64) -> Result<User, ModelError> {
        let raw = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, email, created FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(ModelError::from)
        })?;

        let (id, name, email, created) = raw.ok_or(ModelError::NoRecord)?;
        Ok(User {
            id,
            name,
            email,
            created: parse_utc(&created)?,
        })
    }

    /// Replace a user's password hash after verifying the current password.
    /// A wrong current password is the same invalid-credentials error as a
    /// failed login.
    pub fn update_user_password(
        &self,
        id: i64,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ModelError> {
        let stored_hash = self.with_conn(|conn| {
            conn.query_row(
                "SELECT hashed_password FROM users WHERE id = ?1",
                [id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(ModelError::from)
        })?;

        let stored_hash = stored_hash.ok_or(ModelError::InvalidCredentials)?;
        verify_password(current_password, &stored_hash)?;

        let new_hash = hash_password(new_password)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET hashed_password = ?1 WHERE id = ?2",
                params![new_hash, id],
            )?;
            Ok(())
        })
    }
}
