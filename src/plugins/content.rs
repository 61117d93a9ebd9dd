//! Posts and replies.
//!
//! Every write here runs in a single immediate transaction that covers the content
//! row and all of its fanout (tags, mentions, notifications, thread statistics,
//! edit history). Events reach the store's sink only after that transaction commits.

use crate::core::error::HiveError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::webhooks::EventKind;
use crate::plugins::{agents, boards, fanout};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Post,
    Reply,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Reply => "reply",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "post" => Ok(ContentKind::Post),
            "reply" => Ok(ContentKind::Reply),
            other => Err(HiveError::ValidationError(format!(
                "invalid content type {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Open,
    Closed,
    Pinned,
    Archived,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::Closed => "closed",
            Status::Pinned => "pinned",
            Status::Archived => "archived",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Status::Open),
            "closed" => Ok(Status::Closed),
            "pinned" => Ok(Status::Pinned),
            "archived" => Ok(Status::Archived),
            other => Err(HiveError::ValidationError(format!(
                "invalid status {other:?}: expected open, closed, pinned, or archived"
            ))),
        }
    }
}

/// A post or a reply. Posts are their own thread root (`thread_id == id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    pub created: String,
    pub updated: String,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Content {
    pub fn is_post(&self) -> bool {
        self.kind == ContentKind::Post
    }
}

/// Position of an item inside a thread. Consumed by tree assembly and statistics.
pub trait Threaded {
    fn id(&self) -> &str;
    fn parent_id(&self) -> Option<&str>;
    fn thread_id(&self) -> &str;
    fn author(&self) -> &str;
    fn created(&self) -> &str;
    fn is_reply(&self) -> bool;
}

impl Threaded for Content {
    fn id(&self) -> &str {
        &self.id
    }
    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }
    fn thread_id(&self) -> &str {
        &self.thread_id
    }
    fn author(&self) -> &str {
        &self.author
    }
    fn created(&self) -> &str {
        &self.created
    }
    fn is_reply(&self) -> bool {
        self.kind == ContentKind::Reply
    }
}

/// One pre-edit snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub content_id: String,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    pub edited_by: String,
    pub edited_at: String,
}

pub(crate) const CONTENT_COLUMNS: &str =
    "id, type, author, title, body, created, updated, thread_id, parent_id, status, board_id";

fn conversion_error(idx: usize, e: HiveError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

pub(crate) fn row_to_content(row: &rusqlite::Row<'_>) -> rusqlite::Result<Content> {
    let kind: String = row.get(1)?;
    let status: String = row.get(9)?;
    Ok(Content {
        id: row.get(0)?,
        kind: kind.parse().map_err(|e| conversion_error(1, e))?,
        author: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        created: row.get(5)?,
        updated: row.get(6)?,
        thread_id: row.get(7)?,
        parent_id: row.get(8)?,
        status: status.parse().map_err(|e| conversion_error(9, e))?,
        board_id: row.get(10)?,
        tags: Vec::new(),
    })
}

/// `<UTC stamp>-<first 8 hex of sha256(body)>`. Identical bodies written within the
/// same second share an id, which makes client retries idempotent.
pub fn generate_content_id(body: &str, at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", time::id_stamp(at), &digest[..8])
}

fn require_body(body: &str) -> Result<(), HiveError> {
    if body.trim().is_empty() {
        return Err(HiveError::ValidationError("body is required".into()));
    }
    Ok(())
}

fn require_author(conn: &Connection, author: &str) -> Result<(), HiveError> {
    if author.trim().is_empty() {
        return Err(HiveError::ValidationError("author is required".into()));
    }
    if !agents::agent_exists_tx(conn, author)? {
        return Err(HiveError::NotFound(format!("agent {author}")));
    }
    Ok(())
}

pub(crate) fn get_content_tx(conn: &Connection, id: &str) -> Result<Option<Content>, HiveError> {
    let content = conn
        .query_row(
            &format!("SELECT {CONTENT_COLUMNS} FROM content WHERE id = ?1"),
            [id],
            row_to_content,
        )
        .optional()?;
    match content {
        Some(mut c) => {
            c.tags = load_tags_tx(conn, &c.id)?;
            Ok(Some(c))
        }
        None => Ok(None),
    }
}

fn require_content(conn: &Connection, id: &str) -> Result<Content, HiveError> {
    get_content_tx(conn, id)?.ok_or_else(|| HiveError::NotFound(format!("content {id}")))
}

fn require_post(conn: &Connection, id: &str) -> Result<Content, HiveError> {
    let content = require_content(conn, id)?;
    if !content.is_post() {
        return Err(HiveError::ValidationError(format!(
            "content {id} is a reply, not a post"
        )));
    }
    Ok(content)
}

pub(crate) fn load_tags_tx(conn: &Connection, content_id: &str) -> Result<Vec<String>, HiveError> {
    let mut stmt = conn.prepare("SELECT tag FROM tags WHERE content_id = ?1 ORDER BY tag")?;
    let tags = stmt
        .query_map([content_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tags)
}

pub(crate) fn content_exists_tx(conn: &Connection, id: &str) -> Result<bool, HiveError> {
    Ok(conn
        .query_row("SELECT 1 FROM content WHERE id = ?1", [id], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Kind and thread of a stored item, without its body or tags.
pub(crate) fn kind_and_thread_tx(conn: &Connection, id: &str) -> Result<Option<(ContentKind, String)>, HiveError> {
    let row = conn
        .query_row(
            "SELECT type, thread_id FROM content WHERE id = ?1",
            [id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    match row {
        Some((kind, thread_id)) => Ok(Some((kind.parse()?, thread_id))),
        None => Ok(None),
    }
}

pub fn create_post(
    store: &Store,
    author: &str,
    title: Option<&str>,
    body: &str,
    tags: &[String],
    mentions: &[String],
    board_id: Option<&str>,
) -> Result<Content, HiveError> {
    require_body(body)?;
    let now = store.clock().now();
    let id = generate_content_id(body, now);
    let ts = time::to_rfc3339(now);
    let title = title.map(str::trim).filter(|t| !t.is_empty());
    let board_id = board_id.map(str::trim).filter(|b| !b.is_empty());
    let tags = fanout::dedupe_tags(tags);

    let (content, fresh) = store.write(|conn| {
        require_author(conn, author)?;
        if let Some(board) = board_id
            && !boards::board_exists_tx(conn, board)?
        {
            return Err(HiveError::ValidationError(format!("unknown board {board:?}")));
        }

        let inserted = conn.execute(
            "INSERT INTO content (id, type, author, title, body, created, updated, thread_id, parent_id, status, board_id)
             VALUES (?1, 'post', ?2, ?3, ?4, ?5, ?5, ?1, NULL, 'open', ?6)
             ON CONFLICT(id) DO NOTHING",
            params![id, author, title, body, ts, board_id],
        )?;
        if inserted == 0 {
            tracing::debug!(content = %id, "duplicate post, returning existing row");
            return Ok((require_content(conn, &id)?, None));
        }

        fanout::insert_tags(conn, &id, &tags)?;
        let mentioned = fanout::record_mentions(conn, &id, mentions, body)?;
        let draft = fanout::NotificationDraft {
            from: author,
            thread_id: &id,
            content_id: &id,
            body,
            created: &ts,
        };
        fanout::notify_mentions(conn, &draft, &mentioned)?;
        if let Some(board) = board_id {
            fanout::notify_board_subscribers(conn, &draft, board)?;
        }
        fanout::init_thread_stats(conn, &id, author, &ts)?;

        Ok((require_content(conn, &id)?, Some(mentioned)))
    })?;

    if let Some(mentioned) = fresh {
        tracing::debug!(content = %content.id, tags = content.tags.len(), "post created");
        store.emit(
            EventKind::ThreadCreated,
            serde_json::json!({
                "id": content.id,
                "author": content.author,
                "thread_id": content.thread_id,
                "board_id": content.board_id,
            }),
        );
        emit_mentions(store, &content, mentions, &mentioned);
    }
    Ok(content)
}

pub fn create_reply(
    store: &Store,
    author: &str,
    parent_id: &str,
    body: &str,
    mentions: &[String],
) -> Result<Content, HiveError> {
    require_body(body)?;
    let now = store.clock().now();
    let id = generate_content_id(body, now);
    let ts = time::to_rfc3339(now);

    let (content, fresh) = store.write(|conn| {
        let parent = get_content_tx(conn, parent_id)?
            .ok_or_else(|| HiveError::NotFound(format!("parent content {parent_id}")))?;
        require_author(conn, author)?;

        let inserted = conn.execute(
            "INSERT INTO content (id, type, author, title, body, created, updated, thread_id, parent_id, status, board_id)
             VALUES (?1, 'reply', ?2, NULL, ?3, ?4, ?4, ?5, ?6, 'open', ?7)
             ON CONFLICT(id) DO NOTHING",
            params![id, author, body, ts, parent.thread_id, parent.id, parent.board_id],
        )?;
        if inserted == 0 {
            tracing::debug!(content = %id, "duplicate reply, returning existing row");
            return Ok((require_content(conn, &id)?, None));
        }

        let mentioned = fanout::record_mentions(conn, &id, mentions, body)?;
        let draft = fanout::NotificationDraft {
            from: author,
            thread_id: &parent.thread_id,
            content_id: &id,
            body,
            created: &ts,
        };
        fanout::notify_mentions(conn, &draft, &mentioned)?;
        fanout::notify_reply(conn, &draft, &parent)?;
        fanout::record_reply(conn, &parent.thread_id, author, &ts)?;

        Ok((require_content(conn, &id)?, Some(mentioned)))
    })?;

    if let Some(mentioned) = fresh {
        tracing::debug!(content = %content.id, thread = %content.thread_id, "reply created");
        store.emit(
            EventKind::ReplyCreated,
            serde_json::json!({
                "id": content.id,
                "author": content.author,
                "thread_id": content.thread_id,
                "parent_id": content.parent_id,
            }),
        );
        emit_mentions(store, &content, mentions, &mentioned);
    }
    Ok(content)
}

fn emit_mentions(store: &Store, content: &Content, explicit: &[String], mentioned: &[String]) {
    if explicit.iter().all(|m| m.trim().is_empty()) || mentioned.is_empty() {
        return;
    }
    store.emit(
        EventKind::MentionCreated,
        serde_json::json!({
            "content_id": content.id,
            "thread_id": content.thread_id,
            "from": content.author,
            "mentions": mentioned,
        }),
    );
}

pub fn get_content(store: &Store, id: &str) -> Result<Content, HiveError> {
    store.read(|conn| require_content(conn, id))
}

/// Edits a post's body and, when given, its title. The pre-edit state is kept in history.
pub fn update_post(
    store: &Store,
    id: &str,
    body: &str,
    title: Option<&str>,
    editor: &str,
) -> Result<Content, HiveError> {
    update_content(store, id, ContentKind::Post, body, title, editor)
}

pub fn update_reply(store: &Store, id: &str, body: &str, editor: &str) -> Result<Content, HiveError> {
    update_content(store, id, ContentKind::Reply, body, None, editor)
}

fn update_content(
    store: &Store,
    id: &str,
    kind: ContentKind,
    body: &str,
    title: Option<&str>,
    editor: &str,
) -> Result<Content, HiveError> {
    require_body(body)?;
    let ts = time::to_rfc3339(store.clock().now());
    let title = title.map(str::trim).filter(|t| !t.is_empty());

    let updated = store.write(|conn| {
        let existing = require_content(conn, id)?;
        if existing.kind != kind {
            return Err(HiveError::ValidationError(format!(
                "content {id} is a {}, not a {kind}",
                existing.kind
            )));
        }

        let version: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM content_history WHERE content_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO content_history (content_id, version, title, body, edited_by, edited_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, version, existing.title, existing.body, editor, ts],
        )?;

        let new_title = match kind {
            ContentKind::Post => title.map(str::to_string).or(existing.title),
            ContentKind::Reply => None,
        };
        let n = conn.execute(
            "UPDATE content SET title = ?1, body = ?2, updated = ?3 WHERE id = ?4",
            params![new_title, body, ts, id],
        )?;
        if n == 0 {
            return Err(HiveError::NotFound(format!("content {id}")));
        }
        tracing::debug!(content = id, version, "content edited");
        require_content(conn, id)
    })?;
    Ok(updated)
}

pub fn update_post_status(store: &Store, id: &str, status: Status) -> Result<Content, HiveError> {
    let ts = time::to_rfc3339(store.clock().now());
    let (content, previous) = store.write(|conn| {
        let existing = require_post(conn, id)?;
        conn.execute(
            "UPDATE content SET status = ?1, updated = ?2 WHERE id = ?3",
            params![status.as_str(), ts, id],
        )?;
        Ok((require_content(conn, id)?, existing.status))
    })?;

    if previous != status {
        store.emit(
            EventKind::StatusChanged,
            serde_json::json!({ "id": content.id, "status": status.as_str() }),
        );
    }
    Ok(content)
}

/// Adds `add` then removes `remove` from a post's tags. Returns the sorted result.
pub fn update_post_tags(
    store: &Store,
    id: &str,
    add: &[String],
    remove: &[String],
) -> Result<Vec<String>, HiveError> {
    let add = fanout::dedupe_tags(add);
    let remove = fanout::dedupe_tags(remove);
    store.write(|conn| {
        require_post(conn, id)?;
        fanout::insert_tags(conn, id, &add)?;
        for tag in &remove {
            conn.execute(
                "DELETE FROM tags WHERE content_id = ?1 AND tag = ?2",
                params![id, tag],
            )?;
        }
        load_tags_tx(conn, id)
    })
}

/// Every distinct tag with the number of content items carrying it.
pub fn list_tags(store: &Store) -> Result<Vec<(String, i64)>, HiveError> {
    store.read(|conn| {
        let mut stmt =
            conn.prepare("SELECT tag, COUNT(*) FROM tags GROUP BY tag ORDER BY COUNT(*) DESC, tag")?;
        let tags = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    })
}

/// Deletes a post and its whole thread. Returns the number of content rows removed.
pub fn delete_post_thread(store: &Store, id: &str) -> Result<usize, HiveError> {
    let removed = store.write(|conn| {
        let post = require_post(conn, id)?;
        let thread = post.thread_id;
        let scoped = "SELECT id FROM content WHERE thread_id = ?1";
        conn.execute(&format!("DELETE FROM tags WHERE content_id IN ({scoped})"), [&thread])?;
        conn.execute(&format!("DELETE FROM mentions WHERE content_id IN ({scoped})"), [&thread])?;
        conn.execute(
            &format!("DELETE FROM notifications WHERE content_id IN ({scoped}) OR thread_id = ?1"),
            [&thread],
        )?;
        conn.execute(
            &format!("DELETE FROM content_history WHERE content_id IN ({scoped})"),
            [&thread],
        )?;
        conn.execute("DELETE FROM thread_stats WHERE thread_id = ?1", [&thread])?;
        let removed = conn.execute("DELETE FROM content WHERE thread_id = ?1", [&thread])?;
        Ok(removed)
    })?;
    tracing::debug!(thread = id, removed, "thread deleted");
    Ok(removed)
}

/// Ids of `root_id` and every transitive reply under it, breadth-first.
pub(crate) fn collect_subtree(conn: &Connection, root_id: &str) -> Result<Vec<String>, HiveError> {
    let mut stmt =
        conn.prepare("SELECT id FROM content WHERE parent_id = ?1 ORDER BY created ASC, rowid ASC")?;
    let mut seen: HashSet<String> = HashSet::from([root_id.to_string()]);
    let mut ordered = vec![root_id.to_string()];
    let mut queue = VecDeque::from([root_id.to_string()]);

    while let Some(current) = queue.pop_front() {
        let children = stmt
            .query_map([&current], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for child in children {
            if seen.insert(child.clone()) {
                ordered.push(child.clone());
                queue.push_back(child);
            }
        }
    }
    Ok(ordered)
}

/// Deletes a reply and its descendants, then rebuilds the thread's statistics.
/// Returns the number of content rows removed.
pub fn delete_reply(store: &Store, id: &str) -> Result<usize, HiveError> {
    let removed = store.write(|conn| {
        let reply = require_content(conn, id)?;
        if reply.is_post() {
            return Err(HiveError::ValidationError(format!(
                "content {id} is a post; delete the thread instead"
            )));
        }

        let subtree = collect_subtree(conn, id)?;
        // Children come after their parents in BFS order, so delete back to front.
        for target in subtree.iter().rev() {
            conn.execute("DELETE FROM tags WHERE content_id = ?1", [target])?;
            conn.execute("DELETE FROM mentions WHERE content_id = ?1", [target])?;
            conn.execute("DELETE FROM notifications WHERE content_id = ?1", [target])?;
            conn.execute("DELETE FROM content_history WHERE content_id = ?1", [target])?;
            conn.execute("DELETE FROM content WHERE id = ?1", [target])?;
        }
        fanout::rebuild_thread_stats(conn, &reply.thread_id)?;
        Ok(subtree.len())
    })?;
    tracing::debug!(reply = id, removed, "reply subtree deleted");
    Ok(removed)
}

/// The thread an item belongs to.
pub fn resolve_thread_id(store: &Store, id: &str) -> Result<String, HiveError> {
    store.read(|conn| {
        conn.query_row("SELECT thread_id FROM content WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or_else(|| HiveError::NotFound(format!("content {id}")))
    })
}

/// All content of a thread in creation order, each item with its tags.
pub fn list_thread_content(store: &Store, thread_id: &str) -> Result<Vec<Content>, HiveError> {
    store.read(|conn| thread_content_tx(conn, thread_id))
}

pub(crate) fn thread_content_tx(conn: &Connection, thread_id: &str) -> Result<Vec<Content>, HiveError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONTENT_COLUMNS} FROM content WHERE thread_id = ?1 ORDER BY created ASC, rowid ASC"
    ))?;
    let mut items = stmt
        .query_map([thread_id], row_to_content)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut tag_stmt = conn.prepare(
        "SELECT t.content_id, t.tag FROM tags t JOIN content c ON c.id = t.content_id
         WHERE c.thread_id = ?1 ORDER BY t.tag",
    )?;
    let mut tags: FxHashMap<String, Vec<String>> = FxHashMap::default();
    let rows = tag_stmt.query_map([thread_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (content_id, tag) = row?;
        tags.entry(content_id).or_default().push(tag);
    }
    for item in &mut items {
        if let Some(t) = tags.remove(&item.id) {
            item.tags = t;
        }
    }
    Ok(items)
}

/// Edit history for an item, newest version first.
pub fn list_content_history(store: &Store, id: &str) -> Result<Vec<HistoryEntry>, HiveError> {
    store.read(|conn| {
        if !content_exists_tx(conn, id)? {
            return Err(HiveError::NotFound(format!("content {id}")));
        }
        let mut stmt = conn.prepare(
            "SELECT content_id, version, title, body, edited_by, edited_at
             FROM content_history WHERE content_id = ?1 ORDER BY version DESC",
        )?;
        let entries = stmt
            .query_map([id], |row| {
                Ok(HistoryEntry {
                    content_id: row.get(0)?,
                    version: row.get(1)?,
                    title: row.get(2)?,
                    body: row.get(3)?,
                    edited_by: row.get(4)?,
                    edited_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    })
}
