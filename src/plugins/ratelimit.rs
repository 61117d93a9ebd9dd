//! Per-identity admission control.
//!
//! A `SlidingWindowLimiter` keeps recent request timestamps per key in memory.
//! That state is lost on restart, so write classes are also checked against the
//! content actually authored inside the window.

use crate::core::config::RateLimitConfig;
use crate::core::error::HiveError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::content::ContentKind;
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateClass {
    Reads,
    Search,
    Writes,
    Posts,
    Replies,
}

impl RateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateClass::Reads => "reads",
            RateClass::Search => "search",
            RateClass::Writes => "writes",
            RateClass::Posts => "posts",
            RateClass::Replies => "replies",
        }
    }

    /// Content kind counted by the persisted check, if the class has one.
    /// `Writes` counts every kind.
    fn persisted(&self) -> Option<Option<ContentKind>> {
        match self {
            RateClass::Reads | RateClass::Search => None,
            RateClass::Writes => Some(None),
            RateClass::Posts => Some(Some(ContentKind::Post)),
            RateClass::Replies => Some(Some(ContentKind::Reply)),
        }
    }
}

impl fmt::Display for RateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Search,
    CreatePost,
    CreateReply,
    OtherWrite,
}

impl RequestKind {
    /// Classes a request counts against, checked in this order.
    pub fn classes(&self) -> &'static [RateClass] {
        match self {
            RequestKind::Read => &[RateClass::Reads],
            RequestKind::Search => &[RateClass::Reads, RateClass::Search],
            RequestKind::CreatePost => &[RateClass::Writes, RateClass::Posts],
            RequestKind::CreateReply => &[RateClass::Writes, RateClass::Replies],
            RequestKind::OtherWrite => &[RateClass::Writes],
        }
    }
}

/// Outcome of an admission check. A rejection is a normal value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// 0 means the class is unlimited.
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<RateClass>,
}

impl RateDecision {
    fn unlimited(now: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit: 0,
            remaining: 0,
            reset_at: now,
            class: None,
        }
    }

    fn rejected(limit: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            class: None,
        }
    }

    fn with_class(mut self, class: RateClass) -> Self {
        self.class = Some(class);
        self
    }
}

#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    windows: Mutex<FxHashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a request for `key` if fewer than `limit` were admitted in the
    /// trailing `window`. Rejected requests are not recorded.
    pub fn allow(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> RateDecision {
        if limit == 0 {
            return RateDecision::unlimited(now);
        }
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = windows.entry(key.to_string()).or_default();

        let cutoff = now - window;
        while bucket.front().is_some_and(|t| *t < cutoff) {
            bucket.pop_front();
        }

        let used = u32::try_from(bucket.len()).unwrap_or(u32::MAX);
        if used >= limit {
            let reset_at = bucket.front().map_or(now + window, |oldest| *oldest + window);
            return RateDecision::rejected(limit, reset_at);
        }

        bucket.push_back(now);
        let oldest = bucket.front().copied().unwrap_or(now);
        RateDecision {
            allowed: true,
            limit,
            remaining: limit - used - 1,
            reset_at: oldest + window,
            class: None,
        }
    }

    /// Drops buckets with nothing newer than `now - window`.
    pub fn sweep(&self, window: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - window;
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, bucket| bucket.back().is_some_and(|t| *t >= cutoff));
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLimit {
    pub limit: u32,
    pub window: Duration,
}

impl ClassLimit {
    fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub reads: ClassLimit,
    pub search: ClassLimit,
    pub writes: ClassLimit,
    pub posts: ClassLimit,
    pub replies: ClassLimit,
}

impl RateLimitPolicy {
    pub fn limit_for(&self, class: RateClass) -> ClassLimit {
        match class {
            RateClass::Reads => self.reads,
            RateClass::Search => self.search,
            RateClass::Writes => self.writes,
            RateClass::Posts => self.posts,
            RateClass::Replies => self.replies,
        }
    }
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self {
            reads: ClassLimit::new(cfg.reads_per_minute, Duration::minutes(1)),
            search: ClassLimit::new(cfg.searches_per_minute, Duration::minutes(1)),
            writes: ClassLimit::new(cfg.writes_per_day, Duration::days(1)),
            posts: ClassLimit::new(cfg.posts_per_hour, Duration::hours(1)),
            replies: ClassLimit::new(cfg.replies_per_hour, Duration::hours(1)),
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

/// Content authored by `author` at or after `since`, optionally of one kind,
/// with the oldest qualifying timestamp.
pub fn count_content_by_author_since(
    store: &Store,
    author: &str,
    since: DateTime<Utc>,
    kind: Option<ContentKind>,
) -> Result<(i64, Option<DateTime<Utc>>), HiveError> {
    let since = time::to_rfc3339(since);
    let (count, oldest): (i64, Option<String>) = store.read(|conn| {
        let row = match kind {
            Some(kind) => conn.query_row(
                "SELECT COUNT(*), MIN(created) FROM content
                 WHERE author = ?1 AND created >= ?2 AND type = ?3",
                params![author, since, kind.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*), MIN(created) FROM content WHERE author = ?1 AND created >= ?2",
                params![author, since],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?,
        };
        Ok(row)
    })?;
    let oldest = oldest.as_deref().map(time::parse_rfc3339).transpose()?;
    Ok((count, oldest))
}

/// The limiter plus the policy it enforces. Built once and shared by handlers.
#[derive(Debug, Default)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    limiter: SlidingWindowLimiter,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            limiter: SlidingWindowLimiter::new(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    /// Checks every class `kind` counts against, stopping at the first rejection.
    /// On success, returns the decision with the least quota left.
    pub fn check_request(
        &self,
        store: &Store,
        identity: &str,
        kind: RequestKind,
    ) -> Result<RateDecision, HiveError> {
        let now = store.clock().now();
        let mut tightest: Option<RateDecision> = None;

        for &class in kind.classes() {
            let ClassLimit { limit, window } = self.policy.limit_for(class);
            let key = format!("{identity}:{class}");
            let decision = self.limiter.allow(&key, limit, window, now).with_class(class);
            if !decision.allowed {
                tracing::debug!(identity, %class, "rate limited in memory");
                return Ok(decision);
            }

            if limit > 0
                && let Some(content_kind) = class.persisted()
            {
                let (count, oldest) =
                    count_content_by_author_since(store, identity, now - window, content_kind)?;
                if count >= i64::from(limit) {
                    let reset_at = oldest.map_or(now + window, |t| t + window);
                    tracing::debug!(identity, %class, count, "rate limited by persisted count");
                    return Ok(RateDecision::rejected(limit, reset_at).with_class(class));
                }
            }

            let tighter = match &tightest {
                Some(t) => decision.limit > 0 && (t.limit == 0 || decision.remaining < t.remaining),
                None => true,
            };
            if tighter {
                tightest = Some(decision);
            }
        }
        Ok(tightest.unwrap_or_else(|| RateDecision::unlimited(now)))
    }
}
