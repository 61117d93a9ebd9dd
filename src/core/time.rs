//! Shared timestamp helpers and the injectable clock.

use crate::core::error::HiveError;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use std::sync::{Arc, Mutex};
use ulid::Ulid;

/// Source of "now" for every timestamp the store writes.
///
/// `Clock::system()` reads the wall clock. `Clock::fixed(..)` pins time so tests can
/// control window arithmetic and id generation; `advance` moves a fixed clock forward.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    fixed: Option<Arc<Mutex<DateTime<Utc>>>>,
}

impl Clock {
    pub fn system() -> Self {
        Self { fixed: None }
    }

    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self {
            fixed: Some(Arc::new(Mutex::new(at))),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match &self.fixed {
            Some(at) => *at.lock().unwrap_or_else(|p| p.into_inner()),
            None => Utc::now(),
        }
    }

    /// Moves a fixed clock forward. No effect on the system clock.
    pub fn advance(&self, by: Duration) {
        if let Some(at) = &self.fixed {
            let mut guard = at.lock().unwrap_or_else(|p| p.into_inner());
            *guard += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Some(at) = &self.fixed {
            *at.lock().unwrap_or_else(|p| p.into_inner()) = to;
        }
    }
}

/// Canonical stored form: RFC3339, second precision, `Z` suffix.
pub fn to_rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

/// Compact stamp used as the prefix of content ids (`20240102T030405Z`).
pub fn id_stamp(t: DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, HiveError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| HiveError::ValidationError(format!("invalid timestamp {raw:?}: {e}")))
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Parses durations like `90s`, `1h30m`, `500ms`, `2d`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s == "0" {
        return Some(Duration::zero());
    }

    let mut total = Duration::zero();
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let millis_per_unit = match unit {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            "d" => 86_400_000.0,
            _ => return None,
        };
        let millis = (value * millis_per_unit).round();
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return None;
        }
        total = total.checked_add(&Duration::try_milliseconds(millis as i64)?)?;
    }
    Some(total)
}

/// Interprets a `since` filter: a relative duration back from `now`, an RFC3339
/// timestamp, or a plain `YYYY-MM-DD` date at midnight UTC.
pub fn parse_since(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, HiveError> {
    let s = raw.trim();
    if let Some(d) = parse_duration(s) {
        return now.checked_sub_signed(d).ok_or_else(|| {
            HiveError::ValidationError(format!("since value {raw:?} reaches outside the supported date range"))
        });
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight.and_utc());
    }
    Err(HiveError::ValidationError(format!(
        "invalid since value {raw:?}: expected a duration, RFC3339 timestamp, or YYYY-MM-DD"
    )))
}
