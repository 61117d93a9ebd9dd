//! Webhook registrations and the event sink the store notifies after commits.

use crate::core::error::HiveError;
use crate::core::store::Store;
use crate::core::time;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use ulid::Ulid;

/// Wildcard event filter.
pub const ALL_EVENTS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "thread.created")]
    ThreadCreated,
    #[serde(rename = "reply.created")]
    ReplyCreated,
    #[serde(rename = "mention.created")]
    MentionCreated,
    #[serde(rename = "status.changed")]
    StatusChanged,
    #[serde(rename = "summary.requested")]
    SummaryRequested,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ThreadCreated => "thread.created",
            EventKind::ReplyCreated => "reply.created",
            EventKind::MentionCreated => "mention.created",
            EventKind::StatusChanged => "status.changed",
            EventKind::SummaryRequested => "summary.requested",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event: EventKind,
    pub at: String,
    pub data: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(event: EventKind, at: &DateTime<Utc>, data: serde_json::Value) -> Self {
        Self {
            id: time::new_event_id(),
            event,
            at: time::to_rfc3339(*at),
            data,
        }
    }
}

/// Receives events for committed changes. Delivery transport lives outside the store.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &WebhookEvent) -> Result<(), HiveError>;
}

/// Drops every event.
#[derive(Debug, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn deliver(&self, _event: &WebhookEvent) -> Result<(), HiveError> {
        Ok(())
    }
}

/// Keeps every event in memory, in delivery order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<WebhookEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WebhookEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.event).collect()
    }
}

impl EventSink for RecordingSink {
    fn deliver(&self, event: &WebhookEvent) -> Result<(), HiveError> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub url: String,
    pub events: Vec<String>,
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    pub created_by: String,
    pub created: String,
    pub active: bool,
}

impl Webhook {
    /// Whether this hook wants `event`: wildcard or a case-insensitive name match.
    pub fn accepts(&self, event: &str) -> bool {
        event_allowed(&self.events, event)
    }
}

pub fn event_allowed(filters: &[String], event: &str) -> bool {
    filters
        .iter()
        .any(|f| f == ALL_EVENTS || f.eq_ignore_ascii_case(event))
}

/// `wh_` plus 16 hex characters.
pub fn generate_webhook_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Ulid::new().to_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("wh_{}", &hex[..16])
}

fn normalize_events(events: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for e in events.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        if !out.iter().any(|o| o.eq_ignore_ascii_case(e)) {
            out.push(e.to_string());
        }
    }
    out
}

fn row_to_webhook(row: &rusqlite::Row<'_>) -> rusqlite::Result<Webhook> {
    let events_json: String = row.get(2)?;
    let events: Vec<String> = serde_json::from_str(&events_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Webhook {
        id: row.get(0)?,
        url: row.get(1)?,
        events,
        secret: row.get(3)?,
        created_by: row.get(4)?,
        created: row.get(5)?,
        active: row.get::<_, i64>(6)? != 0,
    })
}

const WEBHOOK_COLUMNS: &str = "id, url, events, secret, created_by, created, active";

pub fn create_webhook(
    store: &Store,
    url: &str,
    events: &[String],
    secret: Option<&str>,
    created_by: &str,
) -> Result<Webhook, HiveError> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(HiveError::ValidationError(format!(
            "webhook url must be http(s): {url:?}"
        )));
    }
    let events = normalize_events(events);
    if events.is_empty() {
        return Err(HiveError::ValidationError(
            "webhook needs at least one event".into(),
        ));
    }
    let hook = Webhook {
        id: generate_webhook_id(),
        url: url.to_string(),
        events,
        secret: secret.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
        created_by: created_by.to_string(),
        created: time::to_rfc3339(store.clock().now()),
        active: true,
    };
    let events_json = serde_json::to_string(&hook.events)?;
    store.write(|conn| {
        conn.execute(
            "INSERT INTO webhooks (id, url, events, secret, created_by, created, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            params![
                hook.id,
                hook.url,
                events_json,
                hook.secret,
                hook.created_by,
                hook.created
            ],
        )?;
        Ok(())
    })?;
    tracing::info!(webhook = %hook.id, url = %hook.url, "webhook registered");
    Ok(hook)
}

pub fn list_webhooks(store: &Store, active_only: bool) -> Result<Vec<Webhook>, HiveError> {
    let filter = if active_only { "WHERE active = 1" } else { "" };
    store.read(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks {filter} ORDER BY created ASC, id ASC"
        ))?;
        let hooks = stmt
            .query_map([], row_to_webhook)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hooks)
    })
}

pub fn get_webhook(store: &Store, id: &str) -> Result<Webhook, HiveError> {
    store.read(|conn| {
        conn.query_row(
            &format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = ?1"),
            [id],
            row_to_webhook,
        )
        .optional()?
        .ok_or_else(|| HiveError::NotFound(format!("webhook {id}")))
    })
}

pub fn set_webhook_active(store: &Store, id: &str, active: bool) -> Result<(), HiveError> {
    store.write(|conn| {
        let n = conn.execute(
            "UPDATE webhooks SET active = ?1 WHERE id = ?2",
            params![active as i64, id],
        )?;
        if n == 0 {
            return Err(HiveError::NotFound(format!("webhook {id}")));
        }
        Ok(())
    })
}

pub fn delete_webhook(store: &Store, id: &str) -> Result<(), HiveError> {
    store.write(|conn| {
        let n = conn.execute("DELETE FROM webhooks WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(HiveError::NotFound(format!("webhook {id}")));
        }
        Ok(())
    })
}

/// Active hooks subscribed to `event`.
pub fn webhooks_for_event(store: &Store, event: EventKind) -> Result<Vec<Webhook>, HiveError> {
    let hooks = list_webhooks(store, true)?;
    Ok(hooks
        .into_iter()
        .filter(|h| h.accepts(event.as_str()))
        .collect())
}
