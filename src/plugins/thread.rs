//! Thread reconstruction and rendering.
//!
//! Storage is flat; a thread is rebuilt here from its creation-ordered rows, then
//! either returned as nested data or flattened into markdown with optional depth,
//! recency, and token limits.

use crate::core::error::HiveError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::content::{self, Content, Threaded};
use crate::plugins::webhooks::EventKind;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, OnceLock};
use tiktoken_rs::{CoreBPE, cl100k_base};

/// Prefix placed in front of token-truncated renderings.
pub const TRUNCATION_MARKER: &str = "[...truncated older content...]\n\n";
const UNTITLED: &str = "Untitled Thread";
const MAX_HEADING_LEVEL: usize = 6;
/// Fallback ratio when the tokenizer is unavailable.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadNode {
    #[serde(flatten)]
    pub content: Content,
    #[serde(default)]
    pub replies: Vec<ThreadNode>,
}

impl ThreadNode {
    /// Number of nodes in this subtree, including itself.
    pub fn len(&self) -> usize {
        1 + self.replies.iter().map(ThreadNode::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Longest root-to-leaf path, counting the root as depth 0.
    pub fn depth(&self) -> usize {
        self.replies
            .iter()
            .map(|r| 1 + r.depth())
            .max()
            .unwrap_or(0)
    }
}

/// Rendering options. Zero means unlimited for `depth` and `max_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThreadView {
    pub since: Option<DateTime<Utc>>,
    pub depth: usize,
    pub max_tokens: usize,
}

/// Builds the reply tree from creation-ordered items. Children keep input order.
/// Items whose parent is absent are left out; the first parentless item is the root.
pub fn build_thread_tree(items: Vec<Content>) -> Result<ThreadNode, HiveError> {
    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    for (i, item) in items.iter().enumerate() {
        index.entry(item.id().to_string()).or_insert(i);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    let mut root = None;
    for (i, item) in items.iter().enumerate() {
        match item.parent_id() {
            None => {
                if root.is_none() {
                    root = Some(i);
                }
            }
            Some(parent) => match index.get(parent) {
                Some(&p) if p != i => children[p].push(i),
                _ => tracing::debug!(item = item.id(), parent, "skipping orphaned reply"),
            },
        }
    }

    let root = root.ok_or_else(|| {
        HiveError::ThreadAssembly(format!("no root among {} item(s)", items.len()))
    })?;
    let mut slots: Vec<Option<Content>> = items.into_iter().map(Some).collect();
    assemble(root, &children, &mut slots).ok_or_else(|| {
        HiveError::ThreadAssembly("root was consumed twice".to_string())
    })
}

fn assemble(at: usize, children: &[Vec<usize>], slots: &mut [Option<Content>]) -> Option<ThreadNode> {
    let content = slots[at].take()?;
    let replies = children[at]
        .iter()
        .filter_map(|&child| assemble(child, children, slots))
        .collect();
    Some(ThreadNode { content, replies })
}

/// Keeps every post and the replies created at or after `since`.
pub fn filter_since(items: Vec<Content>, since: DateTime<Utc>) -> Vec<Content> {
    items
        .into_iter()
        .filter(|item| {
            if !item.is_reply() {
                return true;
            }
            time::parse_rfc3339(&item.created)
                .map(|created| created >= since)
                .unwrap_or(false)
        })
        .collect()
}

/// Removes replies deeper than `depth` (root is depth 0). Zero keeps everything.
pub fn prune_depth(node: &mut ThreadNode, depth: usize) {
    fn walk(node: &mut ThreadNode, level: usize, limit: usize) {
        if level >= limit {
            node.replies.clear();
            return;
        }
        for reply in &mut node.replies {
            walk(reply, level + 1, limit);
        }
    }
    if depth > 0 {
        walk(node, 0, depth);
    }
}

/// Flattens a thread into markdown, depth first, children in creation order.
pub fn render_markdown(root: &ThreadNode, depth_limit: usize) -> String {
    let post = &root.content;
    let title = post
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(UNTITLED);

    let mut out = String::new();
    out.push_str(&format!("# {title}\n\n"));
    out.push_str(&format!(
        "**Author:** {} | **Created:** {} | **Status:** {}\n",
        post.author, post.created, post.status
    ));
    if !post.tags.is_empty() {
        out.push_str(&format!("**Tags:** {}\n", post.tags.join(", ")));
    }
    out.push_str("\n---\n\n");
    out.push_str(&post.body);
    out.push('\n');

    for reply in &root.replies {
        render_reply(&mut out, reply, 1, depth_limit);
    }
    out
}

fn render_reply(out: &mut String, node: &ThreadNode, level: usize, depth_limit: usize) {
    if depth_limit > 0 && level > depth_limit {
        return;
    }
    let hashes = "#".repeat((level + 1).min(MAX_HEADING_LEVEL));
    out.push_str("\n---\n\n");
    out.push_str(&format!(
        "{hashes} Reply by {} ({})\n\n",
        node.content.author, node.content.created
    ));
    out.push_str(&node.content.body);
    out.push('\n');
    for child in &node.replies {
        render_reply(out, child, level + 1, depth_limit);
    }
}

fn tokenizer() -> Option<&'static Mutex<CoreBPE>> {
    static BPE: OnceLock<Option<Mutex<CoreBPE>>> = OnceLock::new();
    BPE.get_or_init(|| match cl100k_base() {
        Ok(bpe) => Some(Mutex::new(bpe)),
        Err(e) => {
            tracing::warn!(error = %e, "tokenizer unavailable, estimating by characters");
            None
        }
    })
    .as_ref()
}

/// cl100k token count, or a chars/4 estimate when the tokenizer cannot load.
pub fn count_tokens(text: &str) -> usize {
    match tokenizer().and_then(|m| m.lock().ok()) {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(CHARS_PER_TOKEN),
    }
}

/// Keeps the tail of `text` that fits in `max_tokens`, prefixed by the truncation
/// marker. Text already within budget, or a zero budget, is returned unchanged.
pub fn truncate_to_token_budget(text: &str, max_tokens: usize) -> String {
    if max_tokens == 0 || count_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let budget = max_tokens.saturating_sub(count_tokens(TRUNCATION_MARKER));
    let lines: Vec<&str> = text.split_inclusive('\n').collect();

    let mut used = 0;
    let mut start = lines.len();
    while start > 0 {
        let cost = count_tokens(lines[start - 1]);
        if used + cost > budget {
            break;
        }
        used += cost;
        start -= 1;
    }

    let tail = if start == lines.len() {
        let last = lines.last().copied().unwrap_or_default();
        tail_chars(last, budget * CHARS_PER_TOKEN)
    } else {
        lines[start..].concat()
    };
    format!("{TRUNCATION_MARKER}{tail}")
}

fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

/// The tree for the thread containing `id`, with `since` and `depth` applied.
pub fn load_thread(store: &Store, id: &str, view: &ThreadView) -> Result<ThreadNode, HiveError> {
    let thread_id = content::resolve_thread_id(store, id)?;
    let mut items = content::list_thread_content(store, &thread_id)?;
    if let Some(since) = view.since {
        items = filter_since(items, since);
    }
    let mut root = build_thread_tree(items)?;
    prune_depth(&mut root, view.depth);
    Ok(root)
}

/// Markdown for the thread containing `id`, with every view limit applied.
pub fn render_thread(store: &Store, id: &str, view: &ThreadView) -> Result<String, HiveError> {
    let root = load_thread(store, id, &ThreadView { depth: 0, ..*view })?;
    let markdown = render_markdown(&root, view.depth);
    Ok(truncate_to_token_budget(&markdown, view.max_tokens))
}

/// First `lines` meaningful lines of the rendered thread. Zero keeps every line.
pub fn summarize_thread(store: &Store, id: &str, lines: usize) -> Result<String, HiveError> {
    let root = load_thread(store, id, &ThreadView::default())?;
    let summary = summarize_markdown(&render_markdown(&root, 0), lines);
    store.emit(
        EventKind::SummaryRequested,
        serde_json::json!({ "thread_id": root.content.thread_id, "summary": summary }),
    );
    Ok(summary)
}

fn summarize_markdown(markdown: &str, lines: usize) -> String {
    let kept = markdown
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty() && l.trim() != "---");
    let kept: Vec<&str> = if lines == 0 {
        kept.collect()
    } else {
        kept.take(lines).collect()
    };
    kept.join("\n")
}
