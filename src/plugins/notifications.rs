//! Notification inbox reads and read-state updates. Rows are written by fanout.

use crate::core::error::HiveError;
use crate::core::store::Store;
use crate::plugins::fanout::NotificationKind;
use crate::plugins::feed::{Page, normalize_limit, normalize_offset};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub from_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub preview: String,
    pub created: String,
    #[serde(default)]
    pub read: bool,
}

pub(crate) const NOTIFICATION_COLUMNS: &str =
    "id, recipient, type, from_agent, thread_id, content_id, preview, read, created";

pub(crate) fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(2)?;
    Ok(Notification {
        id: row.get(0)?,
        recipient: row.get(1)?,
        kind: kind.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        from_agent: row.get(3)?,
        thread_id: row.get(4)?,
        content_id: row.get(5)?,
        preview: row.get(6)?,
        read: row.get::<_, i64>(7)? != 0,
        created: row.get(8)?,
    })
}

/// Newest first. Read notifications are skipped unless `include_read`.
pub fn list_notifications(
    store: &Store,
    recipient: &str,
    include_read: bool,
    limit: i64,
    offset: i64,
) -> Result<Page<Notification>, HiveError> {
    let limit = normalize_limit(limit);
    let offset = normalize_offset(offset);
    let filter = if include_read {
        "recipient = ?1"
    } else {
        "recipient = ?1 AND read = 0"
    };
    store.read(|conn| {
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM notifications WHERE {filter}"),
            [recipient],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE {filter}
             ORDER BY created DESC, rowid DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let items = stmt
            .query_map(params![recipient, limit, offset], row_to_notification)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    })
}

pub(crate) fn all_notifications_tx(conn: &Connection) -> Result<Vec<Notification>, HiveError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications ORDER BY created ASC, rowid ASC"
    ))?;
    let items = stmt
        .query_map([], row_to_notification)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Marks one of `recipient`'s notifications read. Someone else's id is not found.
pub fn mark_notification_read(store: &Store, recipient: &str, id: &str) -> Result<(), HiveError> {
    store.write(|conn| {
        let n = conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient = ?2",
            params![id, recipient],
        )?;
        if n == 0 {
            return Err(HiveError::NotFound(format!("notification {id}")));
        }
        Ok(())
    })
}

/// Returns how many notifications changed state.
pub fn mark_all_notifications_read(store: &Store, recipient: &str) -> Result<usize, HiveError> {
    let n = store.write(|conn| {
        Ok(conn.execute(
            "UPDATE notifications SET read = 1 WHERE recipient = ?1 AND read = 0",
            [recipient],
        )?)
    })?;
    tracing::debug!(recipient, marked = n, "notifications marked read");
    Ok(n)
}
