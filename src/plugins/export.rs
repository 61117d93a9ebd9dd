//! JSON and markdown export.
//!
//! Both formats are re-importable without loss. The JSON document carries every
//! table the import needs; the markdown layout stores one file per content item,
//! with replies nested under directories named after their ancestors.

use crate::core::error::HiveError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::agents::{self, Agent};
use crate::plugins::boards::{self, Board};
use crate::plugins::content::{CONTENT_COLUMNS, Content, ContentKind, Status, row_to_content};
use crate::plugins::notifications::{self, Notification};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rusqlite::Connection;
use rusqlite::types::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Restricts an export to one thread and/or to content created at or after `since`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOptions {
    pub thread_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonExport {
    pub exported_at: String,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub boards: Vec<Board>,
    #[serde(default)]
    pub content: Vec<Content>,
    /// Content id to tags.
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,
    /// Content id to mentioned agent names.
    #[serde(default)]
    pub mentions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownFile {
    /// Slash-separated path relative to the export root.
    pub path: String,
    pub content: String,
}

/// Metadata block at the top of every exported markdown file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
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

impl From<&Content> for FrontMatter {
    fn from(c: &Content) -> Self {
        Self {
            id: c.id.clone(),
            kind: c.kind,
            author: c.author.clone(),
            title: c.title.clone(),
            created: c.created.clone(),
            updated: c.updated.clone(),
            thread_id: c.thread_id.clone(),
            parent_id: c.parent_id.clone(),
            status: c.status,
            board_id: c.board_id.clone(),
            tags: c.tags.clone(),
        }
    }
}

impl FrontMatter {
    pub fn into_content(self, body: String) -> Content {
        Content {
            id: self.id,
            kind: self.kind,
            author: self.author,
            title: self.title,
            body,
            created: self.created,
            updated: self.updated,
            thread_id: self.thread_id,
            parent_id: self.parent_id,
            status: self.status,
            board_id: self.board_id,
            tags: self.tags,
        }
    }
}

fn exported_content_tx(conn: &Connection, opts: &ExportOptions) -> Result<Vec<Content>, HiveError> {
    let mut filters = Vec::new();
    let mut args: Vec<Value> = Vec::new();
    if let Some(thread) = opts.thread_id.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        filters.push("thread_id = ?");
        args.push(Value::Text(thread.to_string()));
    }
    if let Some(since) = opts.since {
        filters.push("created >= ?");
        args.push(Value::Text(time::to_rfc3339(since)));
    }
    let where_clause = if filters.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", filters.join(" AND "))
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {CONTENT_COLUMNS} FROM content {where_clause} ORDER BY created ASC, rowid ASC"
    ))?;
    let mut items = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), row_to_content)?
        .collect::<Result<Vec<_>, _>>()?;

    let tags = grouped_tx(conn, "SELECT content_id, tag FROM tags ORDER BY tag")?;
    for item in &mut items {
        if let Some(t) = tags.get(&item.id) {
            item.tags = t.clone();
        }
    }
    Ok(items)
}

/// `(content_id, value)` rows grouped by content id, keeping row order.
fn grouped_tx(conn: &Connection, sql: &str) -> Result<FxHashMap<String, Vec<String>>, HiveError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut grouped: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for row in rows {
        let (id, value) = row?;
        grouped.entry(id).or_default().push(value);
    }
    Ok(grouped)
}

/// One self-contained document. Notifications are kept when their content is
/// exported or when they reference no content.
pub fn export_json(store: &Store, opts: &ExportOptions) -> Result<JsonExport, HiveError> {
    let exported_at = time::to_rfc3339(store.clock().now());
    let doc = store.read(|conn| {
        let content = exported_content_tx(conn, opts)?;
        let ids: FxHashSet<&str> = content.iter().map(|c| c.id.as_str()).collect();

        let mut tags = BTreeMap::new();
        for (id, t) in grouped_tx(conn, "SELECT content_id, tag FROM tags ORDER BY tag")? {
            if ids.contains(id.as_str()) {
                tags.insert(id, t);
            }
        }
        let mut mentions = BTreeMap::new();
        for (id, m) in grouped_tx(conn, "SELECT content_id, agent FROM mentions ORDER BY agent")? {
            if ids.contains(id.as_str()) {
                mentions.insert(id, m);
            }
        }
        let notifications = notifications::all_notifications_tx(conn)?
            .into_iter()
            .filter(|n| n.content_id.as_deref().is_none_or(|c| ids.contains(c)))
            .collect();

        Ok(JsonExport {
            exported_at: exported_at.clone(),
            agents: agents::list_agents_tx(conn)?,
            boards: boards::list_boards_tx(conn)?,
            tags,
            mentions,
            notifications,
            content,
        })
    })?;
    tracing::debug!(
        content = doc.content.len(),
        notifications = doc.notifications.len(),
        "json export built"
    );
    Ok(doc)
}

/// `---\n{pretty JSON}\n---\n{body}\n`
pub fn render_markdown_file(item: &Content) -> Result<String, HiveError> {
    let meta = serde_json::to_string_pretty(&FrontMatter::from(item))?;
    Ok(format!("---\n{meta}\n---\n{}\n", item.body))
}

/// Relative path of an item: `threads/{thread}/post.md` for the root, otherwise
/// `threads/{thread}/replies/{ancestor ids...}/{id}.md`.
pub fn markdown_path(item: &Content, parents: &FxHashMap<&str, &str>, root_id: &str) -> String {
    if !item.is_post() {
        let mut chain = Vec::new();
        let mut cursor = item.parent_id.as_deref();
        while let Some(id) = cursor {
            if id == root_id || chain.len() > parents.len() {
                break;
            }
            chain.push(id);
            cursor = parents.get(id).copied();
        }
        chain.reverse();
        let mut path = format!("threads/{}/replies", item.thread_id);
        for ancestor in chain {
            path.push('/');
            path.push_str(ancestor);
        }
        return format!("{path}/{}.md", item.id);
    }
    format!("threads/{}/post.md", item.thread_id)
}

fn render_thread_files(thread_id: &str, items: &[Content]) -> Result<Vec<MarkdownFile>, HiveError> {
    let parents: FxHashMap<&str, &str> = items
        .iter()
        .filter_map(|c| c.parent_id.as_deref().map(|p| (c.id.as_str(), p)))
        .collect();
    items
        .iter()
        .map(|item| {
            Ok(MarkdownFile {
                path: markdown_path(item, &parents, thread_id),
                content: render_markdown_file(item)?,
            })
        })
        .collect()
}

/// One markdown file per item of every selected thread. Whole threads are
/// exported; `since` selects threads by post creation time.
pub fn export_markdown(store: &Store, opts: &ExportOptions) -> Result<Vec<MarkdownFile>, HiveError> {
    let threads: Vec<(String, Vec<Content>)> = store.read(|conn| {
        let thread_ids: Vec<String> = match opts.thread_id.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => vec![t.to_string()],
            _ => {
                let since = opts.since.map(time::to_rfc3339);
                let mut stmt = conn.prepare(
                    "SELECT id FROM content WHERE type = 'post' AND (?1 IS NULL OR created >= ?1)
                     ORDER BY created ASC, rowid ASC",
                )?;
                stmt.query_map([since], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        thread_ids
            .into_iter()
            .map(|tid| {
                let items = crate::plugins::content::thread_content_tx(conn, &tid)?;
                Ok((tid, items))
            })
            .collect()
    })?;

    let per_thread = threads
        .par_iter()
        .map(|(tid, items)| render_thread_files(tid, items))
        .collect::<Result<Vec<_>, HiveError>>()?;
    let files: Vec<MarkdownFile> = per_thread.into_iter().flatten().collect();
    tracing::debug!(threads = threads.len(), files = files.len(), "markdown export built");
    Ok(files)
}

/// Writes the markdown export under `dir`. Returns the number of files written.
pub fn write_markdown_export(store: &Store, dir: &Path, opts: &ExportOptions) -> Result<usize, HiveError> {
    let files = export_markdown(store, opts)?;
    for file in &files {
        let target = file
            .path
            .split('/')
            .fold(dir.to_path_buf(), |acc, part| acc.join(part));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &file.content)?;
    }
    Ok(files.len())
}
