//! Schema versioning for the hive database.
//!
//! Every migration carries a strictly increasing version and runs inside its own
//! transaction together with the `schema_version` row that records it. Any version
//! without a row is applied, so a gap left by an older build is filled on open.

use crate::core::error::HiveError;
use crate::core::schemas;
use crate::core::time;
use rusqlite::{Connection, OptionalExtension, params};
use rustc_hash::FxHashSet;
use serde::Serialize;

/// Migration definition
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub applied_at: String,
}

/// All migrations in chronological order
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "initial_schema",
            sql: schemas::INITIAL_SCHEMA,
        },
        Migration {
            version: 2,
            name: "content_history",
            sql: schemas::CONTENT_HISTORY_SCHEMA,
        },
        Migration {
            version: 3,
            name: "webhooks",
            sql: schemas::WEBHOOKS_SCHEMA,
        },
        Migration {
            version: 4,
            name: "boards",
            sql: schemas::BOARDS_SCHEMA,
        },
    ]
}

/// Highest version this build knows how to apply.
pub fn latest_version() -> i64 {
    all_migrations().last().map(|m| m.version).unwrap_or(0)
}

/// Returns the highest recorded version, or 0 for a fresh store.
pub fn current_version(conn: &Connection) -> Result<i64, HiveError> {
    conn.execute_batch(schemas::SCHEMA_VERSION_TABLE)?;
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Applies every pending migration. Returns the versions that were applied.
pub fn migrate(conn: &mut Connection) -> Result<Vec<i64>, HiveError> {
    apply_migrations(conn, &all_migrations())
}

/// Applies every migration in `migrations` (sorted by version) that the store has
/// not recorded yet, including ones below the current version.
pub fn apply_migrations(
    conn: &mut Connection,
    migrations: &[Migration],
) -> Result<Vec<i64>, HiveError> {
    let recorded: FxHashSet<i64> = applied_versions(conn)?.into_iter().map(|m| m.version).collect();
    let mut applied = Vec::new();

    for migration in migrations.iter().filter(|m| !recorded.contains(&m.version)) {
        let tx = conn.transaction()?;
        let run = tx.execute_batch(migration.sql).and_then(|_| {
            tx.execute(
                "INSERT INTO schema_version (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.name, time::now_rfc3339()],
            )
        });
        if let Err(source) = run {
            // Dropping `tx` rolls the partial migration back.
            tracing::error!(
                version = migration.version,
                name = migration.name,
                error = %source,
                "migration failed"
            );
            return Err(HiveError::MigrationError {
                version: migration.version,
                name: migration.name,
                source,
            });
        }
        tx.commit()?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied migration"
        );
        applied.push(migration.version);
    }

    let current = current_version(conn)?;
    if current > latest_version() {
        tracing::warn!(
            store_version = current,
            known_version = latest_version(),
            "store schema is newer than this build"
        );
    }

    Ok(applied)
}

/// Recorded migrations, oldest first.
pub fn applied_versions(conn: &Connection) -> Result<Vec<AppliedMigration>, HiveError> {
    conn.execute_batch(schemas::SCHEMA_VERSION_TABLE)?;
    let mut stmt =
        conn.prepare("SELECT version, name, applied_at FROM schema_version ORDER BY version")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                version: row.get(0)?,
                name: row.get(1)?,
                applied_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
