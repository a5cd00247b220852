//! Redis-backed idempotency store.
//!
//! Records live under `webhook:idempotency:{event}:{key}` with a 7-day TTL.
//! All three operations fail open (see the policy constants): a flaky Redis
//! must never block or drop a business event, at the cost of a possible
//! duplicate fan-out during an outage.

use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use relay_core::idempotency::{IdempotencyStore, DEFAULT_TTL};
use relay_core::policy::FailurePolicy;

use crate::{InfraError, Result};

const KEY_PREFIX: &str = "webhook:idempotency:";

const CHECK_POLICY: FailurePolicy = FailurePolicy::FailOpen;
const MARK_POLICY: FailurePolicy = FailurePolicy::FailOpen;
const CLAIM_POLICY: FailurePolicy = FailurePolicy::FailOpen;

#[derive(Clone)]
pub struct RedisIdempotencyStore {
    connection: ConnectionManager,
    ttl: Duration,
}

impl RedisIdempotencyStore {
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(InfraError::Cache)?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(InfraError::Cache)?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            ttl: DEFAULT_TTL,
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn record_key(event_name: &str, idempotency_key: &str) -> String {
        format!("{KEY_PREFIX}{event_name}:{idempotency_key}")
    }

    fn record_value(event_name: &str, idempotency_key: &str) -> String {
        json!({
            "processedAt": Utc::now().to_rfc3339(),
            "eventName": event_name,
            "idempotencyKey": idempotency_key,
        })
        .to_string()
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
            warn!("Redis health check failed: {}", e);
            InfraError::HealthCheck(format!("Redis health check failed: {e}"))
        })?;

        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn is_processed(&self, event_name: &str, idempotency_key: &str) -> bool {
        let key = Self::record_key(event_name, idempotency_key);
        let mut conn = self.connection.clone();

        match conn.exists::<_, bool>(&key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(error = %e, key = %key, "idempotency check failed");
                // Unknown state resolves to "not yet processed"
                CHECK_POLICY.on_error(false)
            }
        }
    }

    async fn mark_processed(&self, event_name: &str, idempotency_key: &str) {
        let key = Self::record_key(event_name, idempotency_key);
        let value = Self::record_value(event_name, idempotency_key);
        let mut conn = self.connection.clone();

        let outcome: redis::RedisResult<()> = redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await;

        match outcome {
            Ok(()) => debug!(event = event_name, key = idempotency_key, "marked as processed"),
            Err(e) => {
                warn!(
                    error = %e,
                    key = %key,
                    fail_open = MARK_POLICY.fails_open(),
                    "failed to mark as processed"
                );
            }
        }
    }

    async fn try_claim(&self, event_name: &str, idempotency_key: &str) -> bool {
        let key = Self::record_key(event_name, idempotency_key);
        let value = Self::record_value(event_name, idempotency_key);
        let mut conn = self.connection.clone();

        let outcome: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await;

        match outcome {
            Ok(Some(_)) => {
                debug!(event = event_name, key = idempotency_key, "claimed first processing");
                true
            }
            Ok(None) => {
                warn!(event = event_name, key = idempotency_key, "already claimed");
                false
            }
            Err(e) => {
                warn!(error = %e, key = %key, "claim attempt failed");
                // Unknown state resolves to "claimed", keeping events flowing
                CLAIM_POLICY.on_error(true)
            }
        }
    }

    async fn remove(&self, event_name: &str, idempotency_key: &str) {
        let key = Self::record_key(event_name, idempotency_key);
        let mut conn = self.connection.clone();

        if let Err(e) = conn.del::<_, ()>(&key).await {
            warn!(error = %e, key = %key, "failed to remove idempotency record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_layout() {
        assert_eq!(
            RedisIdempotencyStore::record_key("order.confirmed", "K1"),
            "webhook:idempotency:order.confirmed:K1"
        );
    }

    #[test]
    fn test_record_value_fields() {
        let value = RedisIdempotencyStore::record_value("order.confirmed", "K1");
        let parsed: serde_json::Value = serde_json::from_str(&value).unwrap();

        assert_eq!(parsed["eventName"], "order.confirmed");
        assert_eq!(parsed["idempotencyKey"], "K1");
        assert!(parsed["processedAt"].is_string());
    }

    #[test]
    fn test_policies_fail_open() {
        assert!(CHECK_POLICY.fails_open());
        assert!(MARK_POLICY.fails_open());
        assert!(CLAIM_POLICY.fails_open());
    }
}
