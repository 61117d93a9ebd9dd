//! Store handle for a hive database.
//!
//! A `Store` bundles the connection factory, the clock used for every timestamp,
//! the event sink notified after committed writes, and an optional per-query
//! deadline. It is cheap to clone and safe to share across request handlers.

use crate::core::config::HiveConfig;
use crate::core::db;
use crate::core::error::HiveError;
use crate::core::migration;
use crate::core::pool::{Deadline, SqlitePool};
use crate::core::time::Clock;
use crate::plugins::webhooks::{EventKind, EventSink, NoopSink, WebhookEvent};
use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Store {
    /// Directory holding the database and companion files.
    pub root: PathBuf,
    pool: Arc<SqlitePool>,
    clock: Clock,
    sink: Arc<dyn EventSink>,
    deadline: Deadline,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("db_path", &self.pool.db_path())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Store {
    /// Opens (creating if needed) `<root>/hive.db` and brings its schema up to date.
    pub fn open(root: &Path) -> Result<Self, HiveError> {
        Self::open_at(root, &db::hive_db_path(root), db::DEFAULT_BUSY_TIMEOUT_SECS)
    }

    pub fn open_with_config(root: &Path, config: &HiveConfig) -> Result<Self, HiveError> {
        Self::open_at(
            root,
            &config.db_path(root),
            config.store.busy_timeout_secs,
        )
    }

    /// Opens a database at an explicit path. Migration failure is fatal.
    pub fn open_at(root: &Path, db_path: &Path, busy_timeout_secs: u32) -> Result<Self, HiveError> {
        db::ensure_parent_dir(db_path)?;
        let pool = SqlitePool::open(db_path, busy_timeout_secs);
        let applied = pool.with_raw(migration::migrate)?;
        if !applied.is_empty() {
            tracing::info!(db = %db_path.display(), ?applied, "schema migrated");
        }
        Ok(Self {
            root: root.to_path_buf(),
            pool: Arc::new(pool),
            clock: Clock::system(),
            sink: Arc::new(NoopSink),
            deadline: Deadline::none(),
        })
    }

    /// Opens `<root>/hive.db` with an injected clock.
    pub fn open_with_clock(root: &Path, clock: Clock) -> Result<Self, HiveError> {
        Ok(Self::open(root)?.with_clock(clock))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// A handle whose queries are interrupted once `timeout` has elapsed.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Deadline::after(timeout))
    }

    pub fn with_deadline(&self, deadline: Deadline) -> Self {
        let mut scoped = self.clone();
        scoped.deadline = deadline;
        scoped
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    pub fn read<F, R>(&self, f: F) -> Result<R, HiveError>
    where
        F: FnOnce(&Connection) -> Result<R, HiveError>,
    {
        self.pool.with_read(self.deadline, f)
    }

    /// Runs `f` in one immediate transaction; all of its writes commit together.
    pub fn write<F, R>(&self, f: F) -> Result<R, HiveError>
    where
        F: FnOnce(&Connection) -> Result<R, HiveError>,
    {
        self.pool.with_write(self.deadline, f)
    }

    pub fn schema_version(&self) -> Result<i64, HiveError> {
        self.read(migration::current_version)
    }

    /// Hands a committed-change event to the sink. Delivery failures are logged, never
    /// surfaced to the writer.
    pub fn emit(&self, kind: EventKind, data: serde_json::Value) {
        let event = WebhookEvent::new(kind, &self.clock.now(), data);
        if let Err(e) = self.sink.deliver(&event) {
            tracing::warn!(event = kind.as_str(), error = %e, "event delivery failed");
        }
    }
}
