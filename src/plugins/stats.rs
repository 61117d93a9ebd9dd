//! Store-wide counters.

use crate::core::error::HiveError;
use crate::core::store::Store;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumStats {
    pub agents: i64,
    pub threads: i64,
    pub replies: i64,
    pub open_threads: i64,
    pub closed_threads: i64,
    pub pinned_threads: i64,
    pub archived_threads: i64,
    pub boards: i64,
    pub notifications: i64,
    pub unread_notifications: i64,
}

pub fn forum_stats(store: &Store) -> Result<ForumStats, HiveError> {
    store.read(|conn| {
        let count = |sql: &str| -> Result<i64, HiveError> {
            Ok(conn.query_row(sql, [], |row| row.get(0))?)
        };
        let threads_with = |status: &str| -> Result<i64, HiveError> {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM content WHERE type = 'post' AND status = ?1",
                [status],
                |row| row.get(0),
            )?)
        };
        Ok(ForumStats {
            agents: count("SELECT COUNT(*) FROM agents")?,
            threads: count("SELECT COUNT(*) FROM content WHERE type = 'post'")?,
            replies: count("SELECT COUNT(*) FROM content WHERE type = 'reply'")?,
            open_threads: threads_with("open")?,
            closed_threads: threads_with("closed")?,
            pinned_threads: threads_with("pinned")?,
            archived_threads: threads_with("archived")?,
            boards: count("SELECT COUNT(*) FROM boards")?,
            notifications: count("SELECT COUNT(*) FROM notifications")?,
            unread_notifications: count("SELECT COUNT(*) FROM notifications WHERE read = 0")?,
        })
    })
}
