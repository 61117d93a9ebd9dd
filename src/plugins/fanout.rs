//! Derived writes that ride along with a content mutation: tags, mentions,
//! notifications, and per-thread statistics. Everything here takes the caller's
//! transaction; nothing opens its own.

use crate::core::error::HiveError;
use crate::core::output;
use crate::core::store::Store;
use crate::plugins::boards;
use crate::plugins::content::{Content, Threaded};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static MENTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([a-zA-Z0-9][a-zA-Z0-9_-]{0,63})").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    Reply,
    BoardPost,
    TagWatch,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Mention => "mention",
            NotificationKind::Reply => "reply",
            NotificationKind::BoardPost => "board_post",
            NotificationKind::TagWatch => "tag_watch",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "mention" => Ok(NotificationKind::Mention),
            "reply" => Ok(NotificationKind::Reply),
            "board_post" => Ok(NotificationKind::BoardPost),
            "tag_watch" => Ok(NotificationKind::TagWatch),
            other => Err(HiveError::ValidationError(format!(
                "invalid notification type {other:?}"
            ))),
        }
    }
}

/// Denormalized per-thread aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStats {
    pub thread_id: String,
    pub reply_count: i64,
    pub participant_count: i64,
    /// Distinct authors in order of first appearance.
    pub participants: Vec<String>,
    pub last_activity: String,
}

/// The triggering side of a notification.
#[derive(Debug, Clone, Copy)]
pub struct NotificationDraft<'a> {
    pub from: &'a str,
    pub thread_id: &'a str,
    pub content_id: &'a str,
    pub body: &'a str,
    pub created: &'a str,
}

/// Trims, drops blanks, and deduplicates while keeping first-seen order.
pub fn dedupe_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !out.iter().any(|o| o == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

pub(crate) fn insert_tags(conn: &Connection, content_id: &str, tags: &[String]) -> Result<(), HiveError> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO tags (content_id, tag) VALUES (?1, ?2)")?;
    for tag in tags {
        stmt.execute(params![content_id, tag])?;
    }
    Ok(())
}

/// `@name` tokens in `body`, in order of appearance.
pub fn parse_mentions(body: &str) -> Vec<String> {
    MENTION_PATTERN
        .captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Explicit names followed by body tokens, trimmed (leading `@` removed) and deduplicated.
pub fn mention_candidates(explicit: &[String], body: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let parsed = parse_mentions(body);
    for name in explicit.iter().map(String::as_str).chain(parsed.iter().map(String::as_str)) {
        let name = name.trim().trim_start_matches('@');
        if !name.is_empty() && !out.iter().any(|o| o == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Splits candidates into names that exist as agents and names that do not.
pub fn resolve_mentions(
    conn: &Connection,
    candidates: &[String],
) -> Result<(Vec<String>, Vec<String>), HiveError> {
    let mut stmt = conn.prepare("SELECT 1 FROM agents WHERE name = ?1")?;
    let mut resolved = Vec::new();
    let mut unresolved = Vec::new();
    for name in candidates {
        if stmt.query_row([name], |_| Ok(())).optional()?.is_some() {
            resolved.push(name.clone());
        } else {
            unresolved.push(name.clone());
        }
    }
    Ok((resolved, unresolved))
}

/// Resolves and stores mentions for `content_id`. Returns the resolved names.
pub(crate) fn record_mentions(
    conn: &Connection,
    content_id: &str,
    explicit: &[String],
    body: &str,
) -> Result<Vec<String>, HiveError> {
    let candidates = mention_candidates(explicit, body);
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let (resolved, unresolved) = resolve_mentions(conn, &candidates)?;
    if !unresolved.is_empty() {
        tracing::warn!(
            content = content_id,
            unresolved = ?unresolved,
            "dropping mentions of unknown agents"
        );
    }
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO mentions (content_id, agent) VALUES (?1, ?2)")?;
    for name in &resolved {
        stmt.execute(params![content_id, name])?;
    }
    Ok(resolved)
}

/// `notif-` plus 16 hex of sha256(recipient, type, content id).
pub fn notification_id(recipient: &str, kind: NotificationKind, content_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(recipient.as_bytes());
    hasher.update([0x1f]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(content_id.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("notif-{}", &hex[..16])
}

/// Inserts one notification. A repeat for the same (recipient, type, content) is a no-op.
pub(crate) fn create_notification(
    conn: &Connection,
    recipient: &str,
    kind: NotificationKind,
    draft: &NotificationDraft<'_>,
) -> Result<bool, HiveError> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO notifications
            (id, recipient, type, from_agent, thread_id, content_id, preview, read, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
        params![
            notification_id(recipient, kind, draft.content_id),
            recipient,
            kind.as_str(),
            draft.from,
            draft.thread_id,
            draft.content_id,
            output::preview(draft.body),
            draft.created
        ],
    )?;
    Ok(n > 0)
}

pub(crate) fn notify_mentions(
    conn: &Connection,
    draft: &NotificationDraft<'_>,
    mentioned: &[String],
) -> Result<usize, HiveError> {
    let mut created = 0;
    for name in mentioned.iter().filter(|n| n.as_str() != draft.from) {
        if create_notification(conn, name, NotificationKind::Mention, draft)? {
            created += 1;
        }
    }
    Ok(created)
}

/// Notifies the parent's author and the thread root's author, skipping the replier.
pub(crate) fn notify_reply(
    conn: &Connection,
    draft: &NotificationDraft<'_>,
    parent: &Content,
) -> Result<usize, HiveError> {
    let root_author: Option<String> = conn
        .query_row(
            "SELECT author FROM content WHERE id = ?1",
            [&parent.thread_id],
            |row| row.get(0),
        )
        .optional()?;

    let mut recipients: Vec<&str> = Vec::with_capacity(2);
    for candidate in std::iter::once(parent.author.as_str()).chain(root_author.as_deref()) {
        if candidate != draft.from && !recipients.contains(&candidate) {
            recipients.push(candidate);
        }
    }

    let mut created = 0;
    for recipient in recipients {
        if create_notification(conn, recipient, NotificationKind::Reply, draft)? {
            created += 1;
        }
    }
    Ok(created)
}

pub(crate) fn notify_board_subscribers(
    conn: &Connection,
    draft: &NotificationDraft<'_>,
    board_id: &str,
) -> Result<usize, HiveError> {
    let mut created = 0;
    for subscriber in boards::subscribers_tx(conn, board_id)? {
        if subscriber != draft.from
            && create_notification(conn, &subscriber, NotificationKind::BoardPost, draft)?
        {
            created += 1;
        }
    }
    Ok(created)
}

fn load_stats(conn: &Connection, thread_id: &str) -> Result<Option<ThreadStats>, HiveError> {
    let row = conn
        .query_row(
            "SELECT thread_id, reply_count, participant_count, participants, last_activity
             FROM thread_stats WHERE thread_id = ?1",
            [thread_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    match row {
        Some((thread_id, reply_count, participant_count, participants, last_activity)) => {
            Ok(Some(ThreadStats {
                thread_id,
                reply_count,
                participant_count,
                participants: serde_json::from_str(&participants)?,
                last_activity,
            }))
        }
        None => Ok(None),
    }
}

fn save_stats(conn: &Connection, stats: &ThreadStats) -> Result<(), HiveError> {
    conn.execute(
        "INSERT INTO thread_stats (thread_id, reply_count, participant_count, participants, last_activity)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(thread_id) DO UPDATE SET
            reply_count = excluded.reply_count,
            participant_count = excluded.participant_count,
            participants = excluded.participants,
            last_activity = excluded.last_activity",
        params![
            stats.thread_id,
            stats.reply_count,
            stats.participant_count,
            serde_json::to_string(&stats.participants)?,
            stats.last_activity
        ],
    )?;
    Ok(())
}

pub(crate) fn init_thread_stats(
    conn: &Connection,
    thread_id: &str,
    author: &str,
    created: &str,
) -> Result<(), HiveError> {
    save_stats(
        conn,
        &ThreadStats {
            thread_id: thread_id.to_string(),
            reply_count: 0,
            participant_count: 1,
            participants: vec![author.to_string()],
            last_activity: created.to_string(),
        },
    )
}

/// Folds one new reply into the thread's statistics. A missing row is rebuilt from
/// the live content instead of guessed.
pub(crate) fn record_reply(
    conn: &Connection,
    thread_id: &str,
    author: &str,
    created: &str,
) -> Result<(), HiveError> {
    let Some(mut stats) = load_stats(conn, thread_id)? else {
        tracing::warn!(thread = thread_id, "thread stats missing, rebuilding");
        rebuild_thread_stats(conn, thread_id)?;
        return Ok(());
    };
    if !stats.participants.iter().any(|p| p == author) {
        stats.participants.push(author.to_string());
    }
    stats.participant_count = stats.participants.len() as i64;
    stats.reply_count += 1;
    stats.last_activity = created.to_string();
    save_stats(conn, &stats)
}

/// Statistics implied by `items`, which must be in creation order.
pub fn compute_thread_stats<'a, T, I>(thread_id: &str, items: I) -> Option<ThreadStats>
where
    T: Threaded + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut stats: Option<ThreadStats> = None;
    for item in items {
        let s = stats.get_or_insert_with(|| ThreadStats {
            thread_id: thread_id.to_string(),
            reply_count: 0,
            participant_count: 0,
            participants: Vec::new(),
            last_activity: item.created().to_string(),
        });
        if !s.participants.iter().any(|p| p == item.author()) {
            s.participants.push(item.author().to_string());
        }
        if item.is_reply() {
            s.reply_count += 1;
        }
        s.last_activity = item.created().to_string();
    }
    if let Some(s) = stats.as_mut() {
        s.participant_count = s.participants.len() as i64;
    }
    stats
}

/// Statistics recomputed from the live content rows, without writing.
pub(crate) fn recompute_stats_tx(conn: &Connection, thread_id: &str) -> Result<Option<ThreadStats>, HiveError> {
    let items = crate::plugins::content::thread_content_tx(conn, thread_id)?;
    Ok(compute_thread_stats(thread_id, &items))
}

/// Replaces the stored statistics with a full recomputation. Removes the row when the
/// thread has no content left.
pub(crate) fn rebuild_thread_stats(conn: &Connection, thread_id: &str) -> Result<(), HiveError> {
    match recompute_stats_tx(conn, thread_id)? {
        Some(stats) => save_stats(conn, &stats),
        None => {
            conn.execute("DELETE FROM thread_stats WHERE thread_id = ?1", [thread_id])?;
            Ok(())
        }
    }
}

pub fn get_thread_stats(store: &Store, thread_id: &str) -> Result<Option<ThreadStats>, HiveError> {
    store.read(|conn| load_stats(conn, thread_id))
}

pub fn recompute_thread_stats(store: &Store, thread_id: &str) -> Result<Option<ThreadStats>, HiveError> {
    store.read(|conn| recompute_stats_tx(conn, thread_id))
}
