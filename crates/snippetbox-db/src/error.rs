use thiserror::Error;

/// Domain error kinds surfaced by the model layer. Handlers recover from the
/// first three; everything else propagates to a generic server error.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("models: no matching record found")]
    NoRecord,

    #[error("models: duplicate email")]
    DuplicateEmail,

    #[error("models: invalid credentials")]
    InvalidCredentials,

    #[error("password hash error: {0}")]
    PasswordHash(argon2::password_hash::Error),

    #[error("malformed timestamp in store: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}
