//! # Per-identity rate limiting
//!
//! Fixed-window counters keyed by requester identity. Each identity gets a
//! window that opens on its first request; up to `limit` requests are admitted
//! inside it, later ones are rejected without touching the counter. Once the
//! window has elapsed the next request opens a fresh window with a count of 1.
//!
//! ## Bounded memory
//!
//! Records live in a [`moka::sync::Cache`] capped at `max_identities`. Its
//! TinyLFU admission keeps identities that keep calling over a flood of
//! one-shot identities, and eviction costs O(1) per insert. Records expire
//! with their window; [`RateLimiter::sweep`] also drops expired records by
//! the injected clock and is scheduled periodically by the binary.
//!
//! ## Concurrency
//!
//! Lookup, reset, check and increment run inside one `and_compute_with`
//! call, which the cache serializes per key, so two concurrent requests for
//! the same identity can never both take the last free slot.

use chrono::{DateTime, TimeZone, Utc};
use moka::Expiry;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use crate::error::SearchError;

/// Identity used when a request carries nothing to key on.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Millisecond wall clock, injectable for tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// How many requests an identity may make per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub window_start_ms: i64,
    pub window_ms: i64,
    pub count: u32,
}

impl RateLimitRecord {
    fn opened_at(now_ms: i64, window: Duration) -> Self {
        Self {
            window_start_ms: now_ms,
            window_ms: window.as_millis() as i64,
            count: 1,
        }
    }

    fn expired(&self, now_ms: i64) -> bool {
        now_ms - self.window_start_ms >= self.window_ms
    }

    fn reset_at_ms(&self) -> i64 {
        self.window_start_ms + self.window_ms
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms.max(0) as u64)
    }
}

/// Lets the cache reclaim a record once its window is over.
struct WindowExpiry;

impl Expiry<String, RateLimitRecord> for WindowExpiry {
    fn expire_after_create(
        &self,
        _identity: &String,
        record: &RateLimitRecord,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(record.window())
    }

    fn expire_after_update(
        &self,
        _identity: &String,
        record: &RateLimitRecord,
        _updated_at: Instant,
        remaining: Option<Duration>,
    ) -> Option<Duration> {
        // A count of 1 means the window was just reopened
        if record.count == 1 {
            Some(record.window())
        } else {
            remaining
        }
    }
}

/// Read-only snapshot of an identity's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
    /// Time left until the window resets, zero when already expired.
    #[serde(skip)]
    pub retry_after: Duration,
}

pub struct RateLimiter {
    records: Cache<String, RateLimitRecord>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(max_identities: usize) -> Self {
        Self::with_clock(max_identities, Arc::new(SystemClock))
    }

    pub fn with_clock(max_identities: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Cache::builder()
                .max_capacity(max_identities.max(1) as u64)
                .expire_after(WindowExpiry)
                .build(),
            clock,
        }
    }

    /// Admit or reject one request for `identity`.
    pub fn allow(&self, identity: &str, limit: u32, window: Duration) -> bool {
        if limit == 0 {
            return false;
        }

        let now = self.clock.now_ms();
        let outcome = self
            .records
            .entry_by_ref(identity)
            .and_compute_with(|current| match current.map(|entry| entry.into_value()) {
                Some(record) if !record.expired(now) => {
                    if record.count >= limit {
                        Op::Nop
                    } else {
                        Op::Put(RateLimitRecord {
                            count: record.count + 1,
                            ..record
                        })
                    }
                }
                _ => Op::Put(RateLimitRecord::opened_at(now, window)),
            });

        !matches!(outcome, CompResult::Unchanged(_))
    }

    /// Like [`allow`](Self::allow) but reports the rejection with a retry hint.
    pub fn check(&self, identity: &str, policy: RateLimitPolicy) -> Result<(), SearchError> {
        if self.allow(identity, policy.limit, policy.window) {
            return Ok(());
        }
        let retry_after = self
            .info(identity)
            .map_or(policy.window, |info| info.retry_after);
        tracing::info!(
            "Rate limit exceeded for {}, retry in {}ms",
            identity,
            retry_after.as_millis()
        );
        Err(SearchError::RateLimited { retry_after })
    }

    /// Current window of `identity`, without mutating anything.
    pub fn info(&self, identity: &str) -> Option<RateLimitInfo> {
        let now = self.clock.now_ms();
        let record = self.records.get(identity)?;
        let reset_at_ms = record.reset_at_ms();

        Some(RateLimitInfo {
            count: record.count,
            reset_at: Utc
                .timestamp_millis_opt(reset_at_ms)
                .single()
                .unwrap_or_else(Utc::now),
            retry_after: Duration::from_millis((reset_at_ms - now).max(0) as u64),
        })
    }

    /// Drop every record whose window has elapsed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<Arc<String>> = self
            .records
            .iter()
            .filter(|(_, record)| record.expired(now))
            .map(|(identity, _)| identity)
            .collect();

        // Re-checked under the per-key lock in case the window was reopened meanwhile
        let removed = expired
            .iter()
            .filter(|identity| {
                let outcome = self
                    .records
                    .entry_by_ref(identity.as_str())
                    .and_compute_with(|current| match current {
                        Some(entry) if entry.value().expired(now) => Op::Remove,
                        _ => Op::Nop,
                    });
                matches!(outcome, CompResult::Removed(_))
            })
            .count();

        self.records.run_pending_tasks();
        removed
    }

    pub fn len(&self) -> usize {
        self.records.run_pending_tasks();
        self.records.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
