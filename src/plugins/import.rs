//! Import of JSON documents and markdown trees produced by `export`.
//!
//! An import is one write transaction. Posts go in first; replies are then placed
//! in repeated passes, each inserting every pending reply whose parent already
//! exists, until a pass places nothing. Whatever is still pending at that point
//! cannot be resolved and fails the whole import. A post must be its own thread
//! root and a reply must share its parent's thread.

use crate::core::error::HiveError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::agents::{self, Agent};
use crate::plugins::boards;
use crate::plugins::content::{self, Content, ContentKind};
use crate::plugins::export::{FrontMatter, JsonExport};
use crate::plugins::fanout;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const BOM: char = '\u{feff}';
const REQUIRED_KEYS: [&str; 6] = ["id", "type", "author", "created", "updated", "thread_id"];
const IMPORTED_BY: &str = "import";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub agents_created: usize,
    pub boards_created: usize,
    pub posts: usize,
    pub replies: usize,
    /// Tag rows in the store once the import has been applied.
    pub tags: usize,
    pub mentions: usize,
    pub notifications: usize,
    /// Reply placement passes, including the final one that placed nothing.
    pub passes: usize,
    pub threads_rebuilt: usize,
}

/// Splits a markdown file into its front matter and body. Accepts CRLF line endings
/// and a leading byte-order mark; a missing `status` defaults to open.
pub fn parse_front_matter(raw: &str) -> Result<(FrontMatter, String), HiveError> {
    let text = raw.strip_prefix(BOM).unwrap_or(raw).replace("\r\n", "\n");
    let rest = text
        .strip_prefix("---\n")
        .ok_or_else(|| HiveError::ValidationError("missing front matter opening '---'".into()))?;

    let (meta, body) = match rest.find("\n---\n") {
        Some(end) => (&rest[..end], &rest[end + 5..]),
        None => match rest.strip_suffix("\n---") {
            Some(meta) => (meta, ""),
            None => {
                return Err(HiveError::ValidationError(
                    "missing front matter closing '---'".into(),
                ));
            }
        },
    };

    let value: serde_json::Value = serde_json::from_str(meta)
        .map_err(|e| HiveError::ValidationError(format!("invalid front matter: {e}")))?;
    for key in REQUIRED_KEYS {
        let present = value
            .get(key)
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            return Err(HiveError::ValidationError(format!(
                "front matter is missing {key:?}"
            )));
        }
    }
    let front: FrontMatter = serde_json::from_value(value)
        .map_err(|e| HiveError::ValidationError(format!("invalid front matter: {e}")))?;

    let body = body.strip_suffix('\n').unwrap_or(body).to_string();
    Ok((front, body))
}

fn collect_markdown_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), HiveError> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect_markdown_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            out.push(path);
        }
    }
    Ok(())
}

fn insert_agent_tx(conn: &Connection, agent: &Agent) -> Result<bool, HiveError> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO agents (name, api_key, role, created, last_active, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            agent.name,
            agents::hash_api_key(&format!("imported:{}", agent.name)),
            agent.role.as_str(),
            agent.created,
            agent.last_active,
            agent.metadata
        ],
    )?;
    Ok(n > 0)
}

fn upsert_content_tx(conn: &Connection, c: &Content) -> Result<(), HiveError> {
    conn.execute(
        "INSERT INTO content (id, type, author, title, body, created, updated, thread_id, parent_id, status, board_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            type = excluded.type, author = excluded.author, title = excluded.title,
            body = excluded.body, created = excluded.created, updated = excluded.updated,
            thread_id = excluded.thread_id, parent_id = excluded.parent_id,
            status = excluded.status, board_id = excluded.board_id",
        params![
            c.id,
            c.kind.as_str(),
            c.author,
            c.title,
            c.body,
            c.created,
            c.updated,
            c.thread_id,
            c.parent_id,
            c.status.as_str(),
            c.board_id
        ],
    )?;
    Ok(())
}

/// Makes sure a referenced board exists, creating a bare one if needed. Returns
/// the board id to store, or `None` when the id cannot be materialized.
fn ensure_board_tx(conn: &Connection, id: &str, now: &str, report: &mut ImportReport) -> Result<Option<String>, HiveError> {
    if boards::board_exists_tx(conn, id)? {
        return Ok(Some(id.to_string()));
    }
    let board = boards::Board {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        icon: String::new(),
        created_by: IMPORTED_BY.to_string(),
        created: now.to_string(),
        tags: Vec::new(),
    };
    if boards::insert_board_tx(conn, &board, true)? {
        report.boards_created += 1;
        return Ok(Some(board.id));
    }
    tracing::warn!(board = id, "board name already taken, dropping board reference");
    Ok(None)
}

fn import_tx(conn: &Connection, doc: &JsonExport, now: &str) -> Result<ImportReport, HiveError> {
    let mut report = ImportReport::default();

    for agent in &doc.agents {
        if insert_agent_tx(conn, agent)? {
            report.agents_created += 1;
        }
    }
    for board in &doc.boards {
        if boards::insert_board_tx(conn, board, true)? {
            report.boards_created += 1;
        }
    }

    let (posts, mut pending): (Vec<&Content>, Vec<&Content>) =
        doc.content.iter().partition(|c| c.is_post());
    if let Some(orphan) = pending.iter().find(|c| c.parent_id.is_none()) {
        return Err(HiveError::ValidationError(format!(
            "reply {} has no parent_id",
            orphan.id
        )));
    }

    let mut threads = BTreeSet::new();
    let mut place = |conn: &Connection, item: &Content, report: &mut ImportReport| -> Result<(), HiveError> {
        if agents::ensure_agent_tx(conn, &item.author, now)? {
            report.agents_created += 1;
        }
        let mut row = item.clone();
        if let Some(board) = item.board_id.as_deref() {
            row.board_id = ensure_board_tx(conn, board, now, report)?;
        }
        upsert_content_tx(conn, &row)?;
        if row.is_post() {
            fanout::insert_tags(conn, &row.id, &fanout::dedupe_tags(&row.tags))?;
        } else if !row.tags.is_empty() {
            tracing::warn!(content_id = %row.id, "tags on a reply are ignored");
        }
        threads.insert(row.thread_id);
        Ok(())
    };

    for post in posts {
        if post.thread_id != post.id {
            return Err(HiveError::ValidationError(format!(
                "post {} has thread_id {}, expected its own id",
                post.id, post.thread_id
            )));
        }
        place(conn, post, &mut report)?;
        report.posts += 1;
    }

    loop {
        report.passes += 1;
        let before = pending.len();
        let mut still_pending = Vec::with_capacity(before);
        for reply in pending {
            let parent = reply.parent_id.as_deref().unwrap_or_default();
            match content::kind_and_thread_tx(conn, parent)? {
                Some((_, parent_thread)) if parent_thread != reply.thread_id => {
                    return Err(HiveError::ValidationError(format!(
                        "reply {} has thread_id {} but its parent {parent} belongs to thread {parent_thread}",
                        reply.id, reply.thread_id
                    )));
                }
                Some(_) => {
                    place(conn, reply, &mut report)?;
                    report.replies += 1;
                }
                None => still_pending.push(reply),
            }
        }
        pending = still_pending;
        tracing::debug!(pass = report.passes, placed = before - pending.len(), pending = pending.len(), "reply pass");
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }
    if !pending.is_empty() {
        let ids: Vec<String> = pending.iter().map(|c| c.id.clone()).collect();
        return Err(HiveError::UnresolvedReferences {
            count: ids.len(),
            ids,
        });
    }

    let mut missing = Vec::new();
    for (content_id, tags) in &doc.tags {
        match content::kind_and_thread_tx(conn, content_id)? {
            None => missing.push(content_id.clone()),
            Some((ContentKind::Reply, _)) => {
                tracing::warn!(content_id = %content_id, "tags on a reply are ignored");
            }
            Some(_) => fanout::insert_tags(conn, content_id, &fanout::dedupe_tags(tags))?,
        }
    }
    for (content_id, names) in &doc.mentions {
        if !content::content_exists_tx(conn, content_id)? {
            missing.push(content_id.clone());
            continue;
        }
        for name in names {
            if agents::ensure_agent_tx(conn, name, now)? {
                report.agents_created += 1;
            }
            report.mentions += conn.execute(
                "INSERT OR IGNORE INTO mentions (content_id, agent) VALUES (?1, ?2)",
                params![content_id, name.trim()],
            )?;
        }
    }
    for n in &doc.notifications {
        if let Some(content_id) = n.content_id.as_deref()
            && !content::content_exists_tx(conn, content_id)?
        {
            missing.push(n.id.clone());
            continue;
        }
        for name in [&n.recipient, &n.from_agent] {
            if agents::ensure_agent_tx(conn, name, now)? {
                report.agents_created += 1;
            }
        }
        report.notifications += conn.execute(
            "INSERT OR REPLACE INTO notifications
                (id, recipient, type, from_agent, thread_id, content_id, preview, read, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                n.id,
                n.recipient,
                n.kind.as_str(),
                n.from_agent,
                n.thread_id,
                n.content_id,
                n.preview,
                n.read,
                n.created
            ],
        )?;
    }
    if !missing.is_empty() {
        return Err(HiveError::UnresolvedReferences {
            count: missing.len(),
            ids: missing,
        });
    }

    report.tags = conn.query_row("SELECT COUNT(*) FROM tags", [], |row| row.get::<_, i64>(0))? as usize;
    for thread in &threads {
        fanout::rebuild_thread_stats(conn, thread)?;
    }
    report.threads_rebuilt = threads.len();
    Ok(report)
}

/// Imports an already parsed export document.
pub fn import_json_document(store: &Store, doc: &JsonExport) -> Result<ImportReport, HiveError> {
    let now = time::to_rfc3339(store.clock().now());
    let report = store.write(|conn| import_tx(conn, doc, &now))?;
    tracing::debug!(?report, "json import committed");
    Ok(report)
}

pub fn import_json(store: &Store, raw: &str) -> Result<ImportReport, HiveError> {
    let doc: JsonExport = serde_json::from_str(raw.strip_prefix(BOM).unwrap_or(raw))?;
    import_json_document(store, &doc)
}

/// Imports every `.md` file under `dir`, in any order.
pub fn import_markdown(store: &Store, dir: &Path) -> Result<ImportReport, HiveError> {
    let mut files = Vec::new();
    collect_markdown_files(dir, &mut files)?;

    let mut content = Vec::with_capacity(files.len());
    for path in &files {
        let raw = fs::read_to_string(path)?;
        let (front, body) = parse_front_matter(&raw).map_err(|e| match e {
            HiveError::ValidationError(msg) => {
                HiveError::ValidationError(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        content.push(front.into_content(body));
    }

    let doc = JsonExport {
        exported_at: String::new(),
        agents: Vec::new(),
        boards: Vec::new(),
        content,
        tags: Default::default(),
        mentions: Default::default(),
        notifications: Vec::new(),
    };
    let now = time::to_rfc3339(store.clock().now());
    let report = store.write(|conn| import_tx(conn, &doc, &now))?;
    tracing::debug!(files = files.len(), ?report, "markdown import committed");
    Ok(report)
}

/// A directory is read as a markdown export, anything else as a JSON document.
pub fn import_from_path(store: &Store, path: &Path) -> Result<ImportReport, HiveError> {
    if path.is_dir() {
        return import_markdown(store, path);
    }
    let raw = fs::read_to_string(path)?;
    import_json(store, &raw)
}
