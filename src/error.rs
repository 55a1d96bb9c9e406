//! Error taxonomy for the ledger.
//!
//! Three failure classes reach callers: validation errors (rejected before
//! any write), transaction/statement failures (full rollback, original
//! error propagated unchanged), and explicit not-found misses. Cross-table
//! sync failures never surface here; they are logged and swallowed at the
//! trigger point.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any write happened.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An addressed row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Statement or transaction failure. Multi-statement units roll back
    /// fully before this propagates.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("database connection lock poisoned")]
    LockPoisoned,
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
