//! Paginated listings over content: threads, direct replies, and recent activity.

use crate::core::error::HiveError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::content::{CONTENT_COLUMNS, Content, Status, row_to_content};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// Out-of-range limits fall back to the default rather than erroring.
pub fn normalize_limit(limit: i64) -> i64 {
    if limit <= 0 || limit > MAX_LIMIT {
        DEFAULT_LIMIT
    } else {
        limit
    }
}

pub fn normalize_offset(offset: i64) -> i64 {
    offset.max(0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Activity,
    Created,
    Replies,
}

impl SortKey {
    fn column(&self) -> &'static str {
        match self {
            SortKey::Activity => "COALESCE(ts.last_activity, c.created)",
            SortKey::Created => "c.created",
            SortKey::Replies => "COALESCE(ts.reply_count, 0)",
        }
    }
}

impl FromStr for SortKey {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "activity" => Ok(SortKey::Activity),
            "created" => Ok(SortKey::Created),
            "replies" => Ok(SortKey::Replies),
            other => Err(HiveError::ValidationError(format!(
                "invalid sort {other:?}: expected activity, created, or replies"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "desc" => Ok(SortOrder::Desc),
            "asc" => Ok(SortOrder::Asc),
            other => Err(HiveError::ValidationError(format!(
                "invalid order {other:?}: expected asc or desc"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
    pub author: Option<String>,
    /// Every tag must be present on a thread for it to match.
    pub tags: Vec<String>,
    pub board: Option<String>,
    pub status: Option<Status>,
    pub since: Option<DateTime<Utc>>,
    pub sort: SortKey,
    pub order: SortOrder,
}

impl ListParams {
    /// Builds params from loosely typed query values, validating each one.
    #[allow(clippy::too_many_arguments)]
    pub fn from_query(
        limit: Option<i64>,
        offset: Option<i64>,
        author: Option<&str>,
        tags: &[String],
        board: Option<&str>,
        status: Option<&str>,
        since: Option<&str>,
        sort: Option<&str>,
        order: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, HiveError> {
        let nonblank = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
        Ok(Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT),
            offset: offset.unwrap_or(0),
            author: nonblank(author),
            tags: crate::plugins::fanout::dedupe_tags(tags),
            board: nonblank(board),
            status: nonblank(status).map(|s| s.parse()).transpose()?,
            since: nonblank(since)
                .map(|s| time::parse_since(&s, now))
                .transpose()?,
            sort: sort.unwrap_or_default().parse()?,
            order: order.unwrap_or_default().parse()?,
        })
    }
}

/// A post plus its thread statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadListItem {
    #[serde(flatten)]
    pub post: Content,
    pub reply_count: i64,
    pub participant_count: i64,
    pub participants: Vec<String>,
    pub last_activity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub fn list_threads(store: &Store, p: &ListParams) -> Result<Page<ThreadListItem>, HiveError> {
    let limit = normalize_limit(p.limit);
    let offset = normalize_offset(p.offset);

    let mut filters = vec!["c.type = 'post'".to_string()];
    let mut args: Vec<Value> = Vec::new();
    if let Some(author) = &p.author {
        filters.push("c.author = ?".into());
        args.push(Value::Text(author.clone()));
    }
    for tag in &p.tags {
        filters.push("EXISTS (SELECT 1 FROM tags t WHERE t.content_id = c.id AND t.tag = ?)".into());
        args.push(Value::Text(tag.clone()));
    }
    if let Some(board) = &p.board {
        filters.push("c.board_id = ?".into());
        args.push(Value::Text(board.clone()));
    }
    if let Some(status) = p.status {
        filters.push("c.status = ?".into());
        args.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(since) = p.since {
        filters.push("COALESCE(ts.last_activity, c.created) >= ?".into());
        args.push(Value::Text(time::to_rfc3339(since)));
    }
    let where_clause = filters.join(" AND ");

    store.read(|conn| {
        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM content c LEFT JOIN thread_stats ts ON ts.thread_id = c.id
                 WHERE {where_clause}"
            ),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let cols = prefixed_columns("c");
        let sql = format!(
            "SELECT {cols}, COALESCE(ts.reply_count, 0), COALESCE(ts.participant_count, 0),
                    COALESCE(ts.participants, '[]'), COALESCE(ts.last_activity, c.created)
             FROM content c LEFT JOIN thread_stats ts ON ts.thread_id = c.id
             WHERE {where_clause}
             ORDER BY {} {}, c.created DESC, c.rowid DESC
             LIMIT ? OFFSET ?",
            p.sort.column(),
            p.order.sql()
        );
        let mut page_args = args.clone();
        page_args.push(Value::Integer(limit));
        page_args.push(Value::Integer(offset));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(page_args.iter()), |row| {
                let post = row_to_content(row)?;
                let participants: String = row.get(13)?;
                Ok((post, row.get(11)?, row.get(12)?, participants, row.get(14)?))
            })?
            .collect::<Result<Vec<(Content, i64, i64, String, String)>, _>>()?;

        let mut items = Vec::with_capacity(rows.len());
        for (mut post, reply_count, participant_count, participants, last_activity) in rows {
            post.tags = crate::plugins::content::load_tags_tx(conn, &post.id)?;
            items.push(ThreadListItem {
                post,
                reply_count,
                participant_count,
                participants: serde_json::from_str(&participants)?,
                last_activity,
            });
        }
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    })
}

fn prefixed_columns(alias: &str) -> String {
    CONTENT_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Direct children of `parent_id`, oldest first.
pub fn list_replies(
    store: &Store,
    parent_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Page<Content>, HiveError> {
    let limit = normalize_limit(limit);
    let offset = normalize_offset(offset);
    store.read(|conn| {
        if !crate::plugins::content::content_exists_tx(conn, parent_id)? {
            return Err(HiveError::NotFound(format!("content {parent_id}")));
        }
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM content WHERE parent_id = ?1",
            [parent_id],
            |row| row.get(0),
        )?;
        let items = query_content(
            conn,
            &format!(
                "SELECT {CONTENT_COLUMNS} FROM content WHERE parent_id = ?1
                 ORDER BY created ASC, rowid ASC LIMIT ?2 OFFSET ?3"
            ),
            &[
                Value::Text(parent_id.to_string()),
                Value::Integer(limit),
                Value::Integer(offset),
            ],
        )?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    })
}

/// Posts and replies, newest first, optionally for one author.
pub fn list_activity(
    store: &Store,
    author: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Page<Content>, HiveError> {
    let limit = normalize_limit(limit);
    let offset = normalize_offset(offset);
    let author = author.map(str::trim).filter(|a| !a.is_empty());
    store.read(|conn| {
        let (filter, mut args) = match author {
            Some(a) => ("WHERE author = ?1", vec![Value::Text(a.to_string())]),
            None => ("", Vec::new()),
        };
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM content {filter}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        let n = args.len();
        args.push(Value::Integer(limit));
        args.push(Value::Integer(offset));
        let items = query_content(
            conn,
            &format!(
                "SELECT {CONTENT_COLUMNS} FROM content {filter}
                 ORDER BY created DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
                n + 1,
                n + 2
            ),
            &args,
        )?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    })
}

fn query_content(conn: &Connection, sql: &str, args: &[Value]) -> Result<Vec<Content>, HiveError> {
    let mut stmt = conn.prepare(sql)?;
    let items = stmt
        .query_map(params_from_iter(args.iter()), row_to_content)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}
