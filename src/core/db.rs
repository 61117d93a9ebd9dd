use crate::core::error::HiveError;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Database file name inside a hive root.
pub const DB_NAME: &str = "hive.db";

/// Default busy_timeout in seconds.
pub const DEFAULT_BUSY_TIMEOUT_SECS: u32 = 5;

pub fn db_connect(db_path: &str) -> Result<Connection, HiveError> {
    db_connect_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT_SECS)
}

/// Opens a connection with the store-wide pragmas applied.
pub fn db_connect_with_timeout(
    db_path: &str,
    busy_timeout_secs: u32,
) -> Result<Connection, HiveError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(u64::from(busy_timeout_secs)))
        .map_err(HiveError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(HiveError::RusqliteError)?;
    conn.execute_batch(
        "PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;
         PRAGMA cache_size=-64000;",
    )
    .map_err(HiveError::RusqliteError)?;
    Ok(conn)
}

pub fn hive_db_path(root: &Path) -> PathBuf {
    root.join(DB_NAME)
}

/// Creates the parent directory of `db_path` if needed.
pub fn ensure_parent_dir(db_path: &Path) -> Result<(), HiveError> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(HiveError::IoError)?;
    }
    Ok(())
}
