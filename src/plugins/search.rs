//! Full-text search over content.
//!
//! The `content_fts` index is maintained by triggers, so queries here only read.
//! A page of ranked hits and the unpaginated total come from two queries sharing
//! one filter set.

use crate::core::error::HiveError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::content::{CONTENT_COLUMNS, Content, load_tags_tx, row_to_content};
use crate::plugins::feed::{DEFAULT_LIMIT, Page, normalize_limit, normalize_offset};
use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

const SNIPPET_OPEN: &str = ">>>";
const SNIPPET_CLOSE: &str = "<<<";
const SNIPPET_TOKENS: i64 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub query: String,
    pub author: Option<String>,
    /// AND-ed like thread listing tag filters.
    pub tags: Vec<String>,
    pub board: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// Restrict hits to posts.
    pub threads_only: bool,
    pub limit: i64,
    pub offset: i64,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            author: None,
            tags: Vec::new(),
            board: None,
            since: None,
            threads_only: false,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub content: Content,
    /// Body excerpt with matches wrapped in `>>>` and `<<<`.
    pub snippet: String,
    /// bm25 score; lower is a better match.
    pub rank: f64,
}

fn build_filters(p: &SearchParams) -> Result<(String, Vec<Value>), HiveError> {
    let query = p.query.trim();
    if query.is_empty() {
        return Err(HiveError::ValidationError("search query is required".into()));
    }

    let mut filters = vec!["content_fts MATCH ?".to_string()];
    let mut args = vec![Value::Text(query.to_string())];
    if let Some(author) = p.author.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        filters.push("c.author = ?".into());
        args.push(Value::Text(author.to_string()));
    }
    for tag in crate::plugins::fanout::dedupe_tags(&p.tags) {
        filters.push("EXISTS (SELECT 1 FROM tags t WHERE t.content_id = c.id AND t.tag = ?)".into());
        args.push(Value::Text(tag));
    }
    if let Some(board) = p.board.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        filters.push("c.board_id = ?".into());
        args.push(Value::Text(board.to_string()));
    }
    if let Some(since) = p.since {
        filters.push("c.created >= ?".into());
        args.push(Value::Text(time::to_rfc3339(since)));
    }
    if p.threads_only {
        filters.push("c.type = 'post'".into());
    }
    Ok((filters.join(" AND "), args))
}

/// FTS5 rejects malformed query syntax at run time; that is the caller's mistake.
fn classify_query_error(err: HiveError) -> HiveError {
    match err {
        HiveError::RusqliteError(rusqlite::Error::SqliteFailure(_, Some(msg)))
            if msg.starts_with("fts5:") || msg.starts_with("no such column") =>
        {
            HiveError::ValidationError(format!("invalid search query: {msg}"))
        }
        other => other,
    }
}

/// One page of hits ordered by relevance, newest first among equal scores.
pub fn search_content(store: &Store, p: &SearchParams) -> Result<Vec<SearchHit>, HiveError> {
    let (where_clause, mut args) = build_filters(p)?;
    args.push(Value::Integer(normalize_limit(p.limit)));
    args.push(Value::Integer(normalize_offset(p.offset)));

    let cols = CONTENT_COLUMNS
        .split(',')
        .map(|c| format!("c.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {cols},
                snippet(content_fts, 2, '{SNIPPET_OPEN}', '{SNIPPET_CLOSE}', '...', {SNIPPET_TOKENS}),
                bm25(content_fts)
         FROM content_fts JOIN content c ON c.rowid = content_fts.rowid
         WHERE {where_clause}
         ORDER BY bm25(content_fts), c.created DESC
         LIMIT ? OFFSET ?"
    );

    store
        .read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    Ok((row_to_content(row)?, row.get::<_, String>(11)?, row.get::<_, f64>(12)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut hits = Vec::with_capacity(rows.len());
            for (mut content, snippet, rank) in rows {
                content.tags = load_tags_tx(conn, &content.id)?;
                hits.push(SearchHit {
                    content,
                    snippet,
                    rank,
                });
            }
            Ok(hits)
        })
        .map_err(classify_query_error)
}

/// Number of hits ignoring pagination.
pub fn count_search_content(store: &Store, p: &SearchParams) -> Result<i64, HiveError> {
    let (where_clause, args) = build_filters(p)?;
    let sql = format!(
        "SELECT COUNT(*) FROM content_fts JOIN content c ON c.rowid = content_fts.rowid
         WHERE {where_clause}"
    );
    store
        .read(|conn| Ok(conn.query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?))
        .map_err(classify_query_error)
}

/// A page of hits together with the authoritative total.
pub fn search(store: &Store, p: &SearchParams) -> Result<Page<SearchHit>, HiveError> {
    let items = search_content(store, p)?;
    let total = count_search_content(store, p)?;
    tracing::debug!(query = %p.query, hits = items.len(), total, "search");
    Ok(Page {
        items,
        total,
        limit: normalize_limit(p.limit),
        offset: normalize_offset(p.offset),
    })
}
