//! SQLite access with read/write separation, busy retry, and per-query deadlines.
//!
//! Connections are opened fresh for every operation; WAL lets readers proceed while
//! a writer holds the lock. Writes run inside a `BEGIN IMMEDIATE` transaction so the
//! write lock is taken up front and a busy database is retried here rather than
//! failing halfway through a multi-statement operation.

use crate::core::db;
use crate::core::error::HiveError;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Maximum retry attempts for busy/locked errors.
const MAX_RETRIES: u32 = 5;
/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 100;
/// Maximum delay cap (milliseconds).
const MAX_DELAY_MS: u64 = 5_000;
/// SQLite VM steps between deadline checks.
const PROGRESS_STEPS: i32 = 1_000;

/// Optional point in time after which queries are interrupted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Deadline(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Deadline(Some(Instant::now() + timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    fn instant(&self) -> Option<Instant> {
        self.0
    }
}

/// Connection factory for a single hive database.
#[derive(Debug, Clone)]
pub struct SqlitePool {
    db_path: PathBuf,
    busy_timeout_secs: u32,
}

impl SqlitePool {
    pub fn open(db_path: &Path, busy_timeout_secs: u32) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            busy_timeout_secs,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self, deadline: Deadline) -> Result<Connection, HiveError> {
        if deadline.is_expired() {
            return Err(HiveError::Interrupted);
        }
        let conn =
            db::db_connect_with_timeout(&self.db_path.to_string_lossy(), self.busy_timeout_secs)?;
        if let Some(at) = deadline.instant() {
            let _ = conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= at));
        }
        Ok(conn)
    }

    /// Runs `f` inside an immediate transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn with_write<F, R>(&self, deadline: Deadline, f: F) -> Result<R, HiveError>
    where
        F: FnOnce(&Connection) -> Result<R, HiveError>,
    {
        let conn = self.connect(deadline)?;
        retry_on_busy(|| {
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(HiveError::RusqliteError)
        })
        .map_err(interrupted)?;

        match f(&conn) {
            Ok(value) => {
                if let Err(e) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(interrupted(HiveError::RusqliteError(e)));
                }
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(interrupted(e))
            }
        }
    }

    /// Runs `f` against a fresh read connection.
    pub fn with_read<F, R>(&self, deadline: Deadline, f: F) -> Result<R, HiveError>
    where
        F: FnOnce(&Connection) -> Result<R, HiveError>,
    {
        let conn = self.connect(deadline)?;
        f(&conn).map_err(interrupted)
    }

    /// Runs `f` on a connection with no transaction wrapper. Used by the migration engine,
    /// which manages one transaction per migration itself.
    pub fn with_raw<F, R>(&self, f: F) -> Result<R, HiveError>
    where
        F: FnOnce(&mut Connection) -> Result<R, HiveError>,
    {
        let mut conn = self.connect(Deadline::none())?;
        f(&mut conn)
    }
}

/// Retry a closure on `SQLITE_BUSY` / `DatabaseLocked` with exponential backoff.
fn retry_on_busy<F, R>(mut f: F) -> Result<R, HiveError>
where
    F: FnMut() -> Result<R, HiveError>,
{
    let mut attempt = 0u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_busy_error(&e) && attempt < MAX_RETRIES => {
                attempt += 1;
                let delay_ms = (BASE_DELAY_MS * 2u64.pow(attempt - 1)).min(MAX_DELAY_MS);
                tracing::debug!(attempt, delay_ms, "database busy, retrying");
                thread::sleep(Duration::from_millis(delay_ms));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if an error is a SQLite busy/locked error that is retryable.
fn is_busy_error(err: &HiveError) -> bool {
    match err {
        HiveError::RusqliteError(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

/// Collapses SQLite's interrupt failure into `HiveError::Interrupted`.
fn interrupted(err: HiveError) -> HiveError {
    match &err {
        HiveError::RusqliteError(rusqlite::Error::SqliteFailure(code, _))
            if code.code == rusqlite::ErrorCode::OperationInterrupted =>
        {
            HiveError::Interrupted
        }
        _ => err,
    }
}
