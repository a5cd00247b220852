//! Producer-side deduplication seam.
//!
//! A record's existence is the sole truth of "already claimed"; expiry after
//! the TTL permits legitimate reprocessing. Implementations apply their own
//! [`FailurePolicy`](crate::policy::FailurePolicy) internally, so callers
//! never block on bookkeeping failures.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Idempotency records expire after 7 days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Atomic "first processing" claims for (event name, idempotency key) pairs.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Whether the pair was already claimed. Store errors fail open (false)
    /// so events are never silently dropped by infrastructure flakiness.
    async fn is_processed(&self, event_name: &str, idempotency_key: &str) -> bool;

    /// Best-effort claim with TTL; store errors are logged, never surfaced.
    async fn mark_processed(&self, event_name: &str, idempotency_key: &str);

    /// Atomic set-if-absent with TTL. True only for the first claimant;
    /// store errors fail open (true).
    async fn try_claim(&self, event_name: &str, idempotency_key: &str) -> bool;

    /// Drop a claim (testing and manual rollback).
    async fn remove(&self, event_name: &str, idempotency_key: &str);
}

/// In-process store for tests and single-instance development runs.
///
/// Offers the same contract as the Redis-backed store in relay-infra but
/// without cross-instance visibility.
pub struct MemoryIdempotencyStore {
    records: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn record_key(event_name: &str, idempotency_key: &str) -> String {
        format!("{event_name}:{idempotency_key}")
    }

    fn is_live(&self, claimed_at: &Instant) -> bool {
        claimed_at.elapsed() < self.ttl
    }
}

impl Default for MemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn is_processed(&self, event_name: &str, idempotency_key: &str) -> bool {
        let key = Self::record_key(event_name, idempotency_key);
        self.records
            .read()
            .get(&key)
            .is_some_and(|claimed_at| self.is_live(claimed_at))
    }

    async fn mark_processed(&self, event_name: &str, idempotency_key: &str) {
        let key = Self::record_key(event_name, idempotency_key);
        self.records.write().insert(key, Instant::now());
    }

    async fn try_claim(&self, event_name: &str, idempotency_key: &str) -> bool {
        let key = Self::record_key(event_name, idempotency_key);
        let mut records = self.records.write();
        match records.get(&key) {
            Some(claimed_at) if self.is_live(claimed_at) => false,
            _ => {
                records.insert(key, Instant::now());
                true
            }
        }
    }

    async fn remove(&self, event_name: &str, idempotency_key: &str) {
        let key = Self::record_key(event_name, idempotency_key);
        self.records.write().remove(&key);
    }
}
