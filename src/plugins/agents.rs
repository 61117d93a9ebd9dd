//! Agent directory and credential helpers.
//!
//! Credentials are stored as SHA-256 hex digests only; the plaintext key is shown
//! once, at creation time.

use crate::core::error::{HiveError, conflict_on_constraint};
use crate::core::store::Store;
use crate::core::time;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Prefix of every generated API key.
pub const API_KEY_PREFIX: &str = "hive_ak_";
const API_KEY_HEX_LEN: usize = 48;
/// Name of the agent created by `ensure_bootstrap_admin`.
pub const BOOTSTRAP_ADMIN: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Agent => "agent",
        }
    }
}

impl FromStr for Role {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "agent" => Ok(Role::Agent),
            other => Err(HiveError::ValidationError(format!("invalid role {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub role: Role,
    pub created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub name: String,
    pub posts: i64,
    pub replies: i64,
    pub mentions_received: i64,
    pub unread_notifications: i64,
    pub last_content_at: Option<String>,
    pub last_notification_at: Option<String>,
}

fn parse_role(idx: usize, raw: String) -> rusqlite::Result<Role> {
    raw.parse().map_err(|e: HiveError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        name: row.get(0)?,
        role: parse_role(1, row.get(1)?)?,
        created: row.get(2)?,
        last_active: row.get(3)?,
        metadata: row.get(4)?,
    })
}

const AGENT_COLUMNS: &str = "name, role, created, last_active, metadata";

/// Fresh random API key: `hive_ak_` plus 48 hex characters from the OS CSPRNG.
pub fn generate_api_key() -> Result<String, HiveError> {
    let mut bytes = [0u8; API_KEY_HEX_LEN / 2];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| HiveError::IoError(io::Error::other(format!("random source: {e}"))))?;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!("{API_KEY_PREFIX}{hex}"))
}

pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Constant-time comparison of `key` against a stored digest.
pub fn verify_api_key(key: &str, stored_hash: &str) -> bool {
    let candidate = hash_api_key(key);
    if candidate.len() != stored_hash.len() {
        return false;
    }
    candidate.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

fn validate_name(name: &str) -> Result<&str, HiveError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(HiveError::ValidationError("agent name is required".into()));
    }
    if name.len() > 64 || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(HiveError::ValidationError(format!(
            "agent name {name:?} must be 1-64 characters of [A-Za-z0-9_-]"
        )));
    }
    Ok(name)
}

pub fn create_agent(
    store: &Store,
    name: &str,
    role: Role,
    credential_hash: &str,
    metadata: Option<&str>,
) -> Result<Agent, HiveError> {
    let name = validate_name(name)?;
    let created = time::to_rfc3339(store.clock().now());
    store.write(|conn| {
        conn.execute(
            "INSERT INTO agents (name, api_key, role, created, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, credential_hash, role.as_str(), created, metadata],
        )
        .map_err(|e| conflict_on_constraint(e, || format!("agent {name} already exists")))?;
        Ok(())
    })?;
    tracing::info!(agent = name, role = role.as_str(), "agent created");
    Ok(Agent {
        name: name.to_string(),
        role,
        created,
        last_active: None,
        metadata: metadata.map(str::to_string),
    })
}

/// Creates an agent with a freshly generated key. Returns the agent and the plaintext key.
pub fn register_agent(
    store: &Store,
    name: &str,
    role: Role,
    metadata: Option<&str>,
) -> Result<(Agent, String), HiveError> {
    let key = generate_api_key()?;
    let agent = create_agent(store, name, role, &hash_api_key(&key), metadata)?;
    Ok((agent, key))
}

pub fn get_agent(store: &Store, name: &str) -> Result<Agent, HiveError> {
    store.read(|conn| {
        conn.query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE name = ?1"),
            [name],
            row_to_agent,
        )
        .optional()?
        .ok_or_else(|| HiveError::NotFound(format!("agent {name}")))
    })
}

pub fn get_agent_by_credential_hash(store: &Store, hash: &str) -> Result<Agent, HiveError> {
    store.read(|conn| {
        conn.query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE api_key = ?1"),
            [hash],
            row_to_agent,
        )
        .optional()?
        .ok_or_else(|| HiveError::NotFound("agent for credential".to_string()))
    })
}

/// Resolves a plaintext key to its agent and stamps `last_active`.
pub fn authenticate(store: &Store, key: &str) -> Result<Agent, HiveError> {
    let mut agent = get_agent_by_credential_hash(store, &hash_api_key(key))?;
    let now = time::to_rfc3339(store.clock().now());
    store.write(|conn| {
        conn.execute(
            "UPDATE agents SET last_active = ?1 WHERE name = ?2",
            params![now, agent.name],
        )?;
        Ok(())
    })?;
    agent.last_active = Some(now);
    Ok(agent)
}

pub fn list_agents(store: &Store) -> Result<Vec<Agent>, HiveError> {
    store.read(list_agents_tx)
}

pub(crate) fn list_agents_tx(conn: &Connection) -> Result<Vec<Agent>, HiveError> {
    let mut stmt = conn.prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY name"))?;
    let agents = stmt
        .query_map([], row_to_agent)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(agents)
}

pub fn delete_agent(store: &Store, name: &str) -> Result<(), HiveError> {
    store.write(|conn| {
        let n = conn.execute("DELETE FROM agents WHERE name = ?1", [name])?;
        if n == 0 {
            return Err(HiveError::NotFound(format!("agent {name}")));
        }
        Ok(())
    })
}

pub fn count_admins(store: &Store) -> Result<i64, HiveError> {
    store.read(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM agents WHERE role = 'admin'",
            [],
            |row| row.get(0),
        )?)
    })
}

pub fn agent_stats(store: &Store, name: &str) -> Result<AgentStats, HiveError> {
    store.read(|conn| {
        if !agent_exists_tx(conn, name)? {
            return Err(HiveError::NotFound(format!("agent {name}")));
        }
        let count = |sql: &str| -> Result<i64, HiveError> {
            Ok(conn.query_row(sql, [name], |row| row.get(0))?)
        };
        let latest = |sql: &str| -> Result<Option<String>, HiveError> {
            Ok(conn.query_row(sql, [name], |row| row.get(0))?)
        };
        Ok(AgentStats {
            name: name.to_string(),
            posts: count("SELECT COUNT(*) FROM content WHERE author = ?1 AND type = 'post'")?,
            replies: count("SELECT COUNT(*) FROM content WHERE author = ?1 AND type = 'reply'")?,
            mentions_received: count("SELECT COUNT(*) FROM mentions WHERE agent = ?1")?,
            unread_notifications: count(
                "SELECT COUNT(*) FROM notifications WHERE recipient = ?1 AND read = 0",
            )?,
            last_content_at: latest("SELECT MAX(created) FROM content WHERE author = ?1")?,
            last_notification_at: latest(
                "SELECT MAX(created) FROM notifications WHERE recipient = ?1",
            )?,
        })
    })
}

pub(crate) fn agent_exists_tx(conn: &Connection, name: &str) -> Result<bool, HiveError> {
    Ok(conn
        .query_row("SELECT 1 FROM agents WHERE name = ?1", [name], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Creates `name` with a placeholder credential derived from the name if it is missing.
/// Returns true when a row was inserted.
pub(crate) fn ensure_agent_tx(conn: &Connection, name: &str, now: &str) -> Result<bool, HiveError> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(false);
    }
    let n = conn.execute(
        "INSERT OR IGNORE INTO agents (name, api_key, role, created) VALUES (?1, ?2, 'agent', ?3)",
        params![name, hash_api_key(&format!("imported:{name}")), now],
    )?;
    Ok(n > 0)
}

/// Creates the first admin when no admin exists, writing its key (mode 0600) to
/// `key_out`. Returns the admin's name, or `None` when an admin already exists.
pub fn ensure_bootstrap_admin(store: &Store, key_out: &Path) -> Result<Option<String>, HiveError> {
    if count_admins(store)? > 0 {
        return Ok(None);
    }

    let (agent, key) = register_agent(store, BOOTSTRAP_ADMIN, Role::Admin, None)?;
    if let Err(e) = write_key_file(key_out, &key) {
        if let Err(cleanup) = delete_agent(store, &agent.name) {
            tracing::error!(agent = %agent.name, error = %cleanup, "bootstrap cleanup failed");
        }
        return Err(e);
    }
    tracing::info!(agent = %agent.name, key_file = %key_out.display(), "bootstrap admin created");
    Ok(Some(agent.name))
}

fn write_key_file(path: &Path, key: &str) -> Result<(), HiveError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(format!("{key}\n").as_bytes())?;
    Ok(())
}
