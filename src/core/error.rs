use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Thread assembly failed: {0}")]
    ThreadAssembly(String),
    #[error("Unresolved references: {count} record(s) reference missing parents: {}", .ids.join(", "))]
    UnresolvedReferences { count: usize, ids: Vec<String> },
    #[error("Migration {version} ({name}) failed: {source}")]
    MigrationError {
        version: i64,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Operation interrupted: deadline exceeded")]
    Interrupted,
}

impl HiveError {
    /// True for errors a caller can fix by changing its input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            HiveError::ValidationError(_)
                | HiveError::NotFound(_)
                | HiveError::Conflict(_)
                | HiveError::UnresolvedReferences { .. }
        )
    }
}

/// Maps a UNIQUE/PRIMARY KEY violation to `Conflict`, leaving other errors untouched.
pub fn conflict_on_constraint(err: rusqlite::Error, what: impl FnOnce() -> String) -> HiveError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HiveError::Conflict(what())
        }
        _ => HiveError::RusqliteError(err),
    }
}
