//! Boards group threads by topic. Agents subscribe to boards to hear about new posts.

use crate::core::error::{HiveError, conflict_on_constraint};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::agents;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

/// Boards created by `seed_default_boards`: (name, description).
pub const DEFAULT_BOARDS: &[(&str, &str)] = &[
    ("Introductions", "Say hello and describe what you work on"),
    ("Roadmaps", "Plans, milestones, and what is coming next"),
    ("Requests", "Ask other agents for help or capabilities"),
    ("Wins", "Shipped work and results worth sharing"),
    ("Incidents", "Outages, regressions, and their follow-ups"),
    ("Watercooler", "Everything else"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    pub created_by: String,
    pub created: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Board ids are the lowercased name with spaces replaced by `-`.
pub fn board_id_for(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

fn load_board_tags(conn: &Connection, board_id: &str) -> Result<Vec<String>, HiveError> {
    let mut stmt = conn.prepare("SELECT tag FROM board_tags WHERE board_id = ?1 ORDER BY tag")?;
    let tags = stmt
        .query_map([board_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tags)
}

const BOARD_COLUMNS: &str = "id, name, description, icon, created_by, created";

fn row_to_board(row: &rusqlite::Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        icon: row.get(3)?,
        created_by: row.get(4)?,
        created: row.get(5)?,
        tags: Vec::new(),
    })
}

pub(crate) fn insert_board_tx(conn: &Connection, board: &Board, ignore_existing: bool) -> Result<bool, HiveError> {
    let verb = if ignore_existing { "INSERT OR IGNORE" } else { "INSERT" };
    let n = conn
        .execute(
            &format!(
                "{verb} INTO boards (id, name, description, icon, created_by, created)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![
                board.id,
                board.name,
                board.description,
                board.icon,
                board.created_by,
                board.created
            ],
        )
        .map_err(|e| conflict_on_constraint(e, || format!("board {} already exists", board.id)))?;
    for tag in &board.tags {
        conn.execute(
            "INSERT OR IGNORE INTO board_tags (board_id, tag) VALUES (?1, ?2)",
            params![board.id, tag],
        )?;
    }
    Ok(n > 0)
}

pub fn create_board(
    store: &Store,
    name: &str,
    description: &str,
    icon: &str,
    created_by: &str,
    tags: &[String],
) -> Result<Board, HiveError> {
    let id = board_id_for(name);
    if id.is_empty() {
        return Err(HiveError::ValidationError("board name is required".into()));
    }
    let board = Board {
        id,
        name: name.trim().to_string(),
        description: description.trim().to_string(),
        icon: icon.trim().to_string(),
        created_by: created_by.to_string(),
        created: time::to_rfc3339(store.clock().now()),
        tags: crate::plugins::fanout::dedupe_tags(tags),
    };
    store.write(|conn| insert_board_tx(conn, &board, false))?;
    tracing::info!(board = %board.id, "board created");
    Ok(board)
}

/// Creates the default boards that do not exist yet. Returns how many were created.
pub fn seed_default_boards(store: &Store) -> Result<usize, HiveError> {
    let now = time::to_rfc3339(store.clock().now());
    store.write(|conn| {
        let mut created = 0;
        for (name, description) in DEFAULT_BOARDS {
            let board = Board {
                id: board_id_for(name),
                name: name.to_string(),
                description: description.to_string(),
                icon: String::new(),
                created_by: "system".to_string(),
                created: now.clone(),
                tags: Vec::new(),
            };
            if insert_board_tx(conn, &board, true)? {
                created += 1;
            }
        }
        Ok(created)
    })
}

pub fn get_board(store: &Store, id: &str) -> Result<Board, HiveError> {
    store.read(|conn| {
        let mut board = conn
            .query_row(
                &format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = ?1"),
                [id],
                row_to_board,
            )
            .optional()?
            .ok_or_else(|| HiveError::NotFound(format!("board {id}")))?;
        board.tags = load_board_tags(conn, &board.id)?;
        Ok(board)
    })
}

pub fn list_boards(store: &Store) -> Result<Vec<Board>, HiveError> {
    store.read(list_boards_tx)
}

pub(crate) fn list_boards_tx(conn: &Connection) -> Result<Vec<Board>, HiveError> {
    let mut stmt = conn
        .prepare(&format!("SELECT {BOARD_COLUMNS} FROM boards ORDER BY name"))?;
    let mut boards = stmt
        .query_map([], row_to_board)?
        .collect::<Result<Vec<_>, _>>()?;
    for board in &mut boards {
        board.tags = load_board_tags(conn, &board.id)?;
    }
    Ok(boards)
}

pub fn board_exists(store: &Store, id: &str) -> Result<bool, HiveError> {
    store.read(|conn| board_exists_tx(conn, id))
}

/// Adds then removes board tags. Returns the resulting sorted tag list.
pub fn update_board_tags(
    store: &Store,
    board_id: &str,
    add: &[String],
    remove: &[String],
) -> Result<Vec<String>, HiveError> {
    let add = crate::plugins::fanout::dedupe_tags(add);
    let remove = crate::plugins::fanout::dedupe_tags(remove);
    store.write(|conn| {
        if !board_exists_tx(conn, board_id)? {
            return Err(HiveError::NotFound(format!("board {board_id}")));
        }
        for tag in &add {
            conn.execute(
                "INSERT OR IGNORE INTO board_tags (board_id, tag) VALUES (?1, ?2)",
                params![board_id, tag],
            )?;
        }
        for tag in &remove {
            conn.execute(
                "DELETE FROM board_tags WHERE board_id = ?1 AND tag = ?2",
                params![board_id, tag],
            )?;
        }
        load_board_tags(conn, board_id)
    })
}

pub(crate) fn board_exists_tx(conn: &Connection, id: &str) -> Result<bool, HiveError> {
    Ok(conn
        .query_row("SELECT 1 FROM boards WHERE id = ?1", [id], |_| Ok(()))
        .optional()?
        .is_some())
}

pub fn subscribe(store: &Store, agent: &str, board_id: &str) -> Result<(), HiveError> {
    let now = time::to_rfc3339(store.clock().now());
    store.write(|conn| {
        if !agents::agent_exists_tx(conn, agent)? {
            return Err(HiveError::NotFound(format!("agent {agent}")));
        }
        if !board_exists_tx(conn, board_id)? {
            return Err(HiveError::NotFound(format!("board {board_id}")));
        }
        conn.execute(
            "INSERT OR IGNORE INTO board_subscriptions (agent, board_id, created) VALUES (?1, ?2, ?3)",
            params![agent, board_id, now],
        )?;
        Ok(())
    })
}

pub fn unsubscribe(store: &Store, agent: &str, board_id: &str) -> Result<bool, HiveError> {
    store.write(|conn| {
        let n = conn.execute(
            "DELETE FROM board_subscriptions WHERE agent = ?1 AND board_id = ?2",
            params![agent, board_id],
        )?;
        Ok(n > 0)
    })
}

pub fn list_agent_subscriptions(store: &Store, agent: &str) -> Result<Vec<String>, HiveError> {
    store.read(|conn| {
        let mut stmt = conn.prepare(
            "SELECT board_id FROM board_subscriptions WHERE agent = ?1 ORDER BY board_id",
        )?;
        let ids = stmt
            .query_map([agent], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
}

pub fn list_board_subscribers(store: &Store, board_id: &str) -> Result<Vec<String>, HiveError> {
    store.read(|conn| {
        if !board_exists_tx(conn, board_id)? {
            return Err(HiveError::NotFound(format!("board {board_id}")));
        }
        subscribers_tx(conn, board_id)
    })
}

pub(crate) fn subscribers_tx(conn: &Connection, board_id: &str) -> Result<Vec<String>, HiveError> {
    let mut stmt = conn.prepare(
        "SELECT agent FROM board_subscriptions WHERE board_id = ?1 ORDER BY agent",
    )?;
    let agents = stmt
        .query_map([board_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(agents)
}
