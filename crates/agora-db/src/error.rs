use std::fmt;

use thiserror::Error;

/// Column whose UNIQUE constraint rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::Username => f.write_str("username"),
            UniqueField::Email => f.write_str("email"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0} is already taken")]
    Conflict(UniqueField),

    #[error("unknown database backend: {0}")]
    UnknownBackend(String),

    #[error("database lock poisoned: {0}")]
    LockPoisoned(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Turns a UNIQUE violation on `users` into a `Conflict` naming the column.
/// Any other error passes through unchanged.
pub(crate) fn unique_violation(err: rusqlite::Error) -> DbError {
    if let rusqlite::Error::SqliteFailure(code, Some(msg)) = &err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            if msg.contains("users.email") {
                return DbError::Conflict(UniqueField::Email);
            }
            if msg.contains("users.username") {
                return DbError::Conflict(UniqueField::Username);
            }
        }
    }
    err.into()
}
