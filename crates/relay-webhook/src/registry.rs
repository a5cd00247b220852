//! Subscriber registry: resolves, caches, and pattern-matches the endpoints
//! interested in an event.
//!
//! The cache is a single time-versioned snapshot replaced wholesale on
//! refresh; readers never observe a partially updated list. Refresh failure
//! keeps a non-empty stale cache (availability over freshness) and installs
//! the configured fallback list only when there is nothing to keep.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::subscriber::{SourceSubscriber, Subscriber};
use crate::{Result, WebhookError};

const SUBSCRIBERS_TABLE: &str = "webhook_subscribers";

/// Authoritative source of active subscribers.
#[async_trait]
pub trait SubscriberSource: Send + Sync {
    async fn fetch_active(&self) -> Result<Vec<SourceSubscriber>>;
}

/// REST source: `GET {base}/rest/v1/webhook_subscribers?is_active=eq.true`.
pub struct HttpSubscriberSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSubscriberSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WebhookError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl SubscriberSource for HttpSubscriberSource {
    async fn fetch_active(&self) -> Result<Vec<SourceSubscriber>> {
        if self.base_url.is_empty() || self.api_key.is_empty() {
            warn!("Subscriber source not configured, skipping fetch");
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/rest/v1/{}?is_active=eq.true&select=*",
            self.base_url, SUBSCRIBERS_TABLE
        );
        debug!(url = %url, "Fetching subscribers");

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| WebhookError::SourceFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WebhookError::SourceFetch(format!(
                "Unexpected status {}",
                response.status()
            )));
        }

        let rows: Vec<SourceSubscriber> = response
            .json()
            .await
            .map_err(|e| WebhookError::SourceFetch(e.to_string()))?;

        info!(count = rows.len(), "Fetched subscribers from source");
        Ok(rows)
    }
}

struct CacheEntry {
    subscribers: Arc<Vec<Subscriber>>,
    last_updated: Option<Instant>,
}

/// Cache introspection for health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub subscriber_count: usize,
    pub age_ms: Option<u64>,
    pub is_valid: bool,
    pub using_fallback: bool,
}

pub struct SubscriberRegistry {
    source: Arc<dyn SubscriberSource>,
    cache: RwLock<CacheEntry>,
    ttl: Duration,
    default_secret: String,
    fallback: Vec<Subscriber>,
}

impl SubscriberRegistry {
    pub fn new(
        source: Arc<dyn SubscriberSource>,
        ttl: Duration,
        default_secret: impl Into<String>,
        fallback: Vec<Subscriber>,
    ) -> Self {
        Self {
            source,
            cache: RwLock::new(CacheEntry {
                subscribers: Arc::new(Vec::new()),
                last_updated: None,
            }),
            ttl,
            default_secret: default_secret.into(),
            fallback,
        }
    }

    /// Build the fallback entry for a statically configured receiver.
    pub fn fallback_subscriber(id: &str, name: &str, url: &str, secret: &str) -> Subscriber {
        Subscriber {
            id: format!("fallback-{id}"),
            name: name.to_string(),
            url: url.to_string(),
            secret_key: secret.to_string(),
            event_patterns: vec![String::from("*")],
            is_active: true,
        }
    }

    fn snapshot(&self) -> Arc<Vec<Subscriber>> {
        Arc::clone(&self.cache.read().subscribers)
    }

    /// Sole mutation point: replace the snapshot wholesale and stamp it.
    fn install(&self, subscribers: Vec<Subscriber>) {
        let mut cache = self.cache.write();
        cache.subscribers = Arc::new(subscribers);
        cache.last_updated = Some(Instant::now());
    }

    fn is_cache_valid(&self) -> bool {
        let cache = self.cache.read();
        if cache.subscribers.is_empty() {
            return false;
        }
        cache
            .last_updated
            .is_some_and(|updated| updated.elapsed() < self.ttl)
    }

    /// Refresh the cache from the source.
    ///
    /// A failed refresh with nothing cached still stamps the entry, so a dead
    /// source does not turn every resolve into a fetch storm.
    pub async fn refresh(&self) {
        match self.source.fetch_active().await {
            Ok(rows) if !rows.is_empty() => {
                let subscribers: Vec<Subscriber> = rows
                    .into_iter()
                    .map(|row| Subscriber::from_source(row, &self.default_secret))
                    .collect();
                info!(count = subscribers.len(), "Subscriber cache refreshed");
                self.install(subscribers);
            }
            Ok(_) => {
                warn!("No subscribers from source, installing fallback");
                self.install(self.fallback.clone());
            }
            Err(e) => {
                error!(error = %e, "Subscriber refresh failed");
                let empty = self.cache.read().subscribers.is_empty();
                if empty {
                    warn!(
                        count = self.fallback.len(),
                        "Installing fallback subscribers after refresh failure"
                    );
                    self.install(self.fallback.clone());
                }
                // A non-empty cache is kept even past its TTL
            }
        }
    }

    async fn ensure_fresh(&self) {
        if !self.is_cache_valid() {
            debug!("Subscriber cache stale, refreshing");
            self.refresh().await;
        }
    }

    /// Active subscribers whose pattern set matches `event_name`.
    pub async fn resolve(&self, event_name: &str) -> Vec<Subscriber> {
        self.ensure_fresh().await;

        let matching: Vec<Subscriber> = self
            .snapshot()
            .iter()
            .filter(|sub| sub.matches(event_name))
            .cloned()
            .collect();

        debug!(
            event = event_name,
            count = matching.len(),
            "Resolved subscribers"
        );
        matching
    }

    /// All active subscribers, unfiltered.
    pub async fn all_active(&self) -> Vec<Subscriber> {
        self.ensure_fresh().await;
        self.snapshot()
            .iter()
            .filter(|sub| sub.is_active)
            .cloned()
            .collect()
    }

    /// Refresh unconditionally and return the resulting list.
    pub async fn force_refresh(&self) -> Vec<Subscriber> {
        self.refresh().await;
        self.snapshot().as_ref().clone()
    }

    pub async fn by_name(&self, name: &str) -> Option<Subscriber> {
        self.ensure_fresh().await;
        self.snapshot().iter().find(|sub| sub.name == name).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.read();
        let using_fallback = cache
            .subscribers
            .first()
            .is_some_and(|sub| sub.id.starts_with("fallback-"));

        CacheStats {
            subscriber_count: cache.subscribers.len(),
            age_ms: cache
                .last_updated
                .map(|updated| updated.elapsed().as_millis() as u64),
            is_valid: !cache.subscribers.is_empty()
                && cache
                    .last_updated
                    .is_some_and(|updated| updated.elapsed() < self.ttl),
            using_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Source that plays back a scripted sequence of responses.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Vec<SourceSubscriber>>>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<SourceSubscriber>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl SubscriberSource for ScriptedSource {
        async fn fetch_active(&self) -> Result<Vec<SourceSubscriber>> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(WebhookError::SourceFetch(String::from("exhausted"))))
        }
    }

    fn source_row(name: &str, patterns: serde_json::Value) -> SourceSubscriber {
        SourceSubscriber {
            id: format!("uuid-{name}"),
            name: name.to_string(),
            target_url: format!("https://example.com/{name}"),
            event_patterns: Some(patterns),
            is_active: true,
            secret_key: Some(String::from("row_secret")),
            created_at: None,
            updated_at: None,
        }
    }

    fn fallback_list() -> Vec<Subscriber> {
        vec![SubscriberRegistry::fallback_subscriber(
            "logger",
            "webhook-logger",
            "https://fallback.example.com/logger",
            "fallback_secret",
        )]
    }

    #[tokio::test]
    async fn test_resolve_filters_by_pattern() {
        let source = ScriptedSource::new(vec![Ok(vec![
            source_row("products-hook", json!(["product.*"])),
            source_row("orders-hook", json!(["order.confirmed"])),
        ])]);
        let registry =
            SubscriberRegistry::new(source, Duration::from_secs(45), "default", Vec::new());

        let matched = registry.resolve("product.stockReserved").await;
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "products-hook");

        let matched = registry.resolve("order.cancelled").await;
        assert!(matched.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_stale_cache() {
        let source = ScriptedSource::new(vec![
            Ok(vec![source_row("orders-hook", json!(["order.*"]))]),
            Err(WebhookError::SourceFetch(String::from("boom"))),
        ]);
        // Zero TTL: every resolve goes back to the source
        let registry = SubscriberRegistry::new(source, Duration::ZERO, "default", fallback_list());

        let first = registry.resolve("order.confirmed").await;
        assert_eq!(first.len(), 1);

        // Second resolve hits the failing source; stale list survives
        let second = registry.resolve("order.confirmed").await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "orders-hook");
        assert!(!registry.stats().using_fallback);
    }

    #[tokio::test]
    async fn test_refresh_failure_with_empty_cache_installs_fallback() {
        let source = ScriptedSource::new(vec![Err(WebhookError::SourceFetch(String::from(
            "unreachable",
        )))]);
        let registry =
            SubscriberRegistry::new(source, Duration::from_secs(45), "default", fallback_list());

        let resolved = registry.resolve("anything.at.all").await;

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "webhook-logger");
        assert!(registry.stats().using_fallback);
    }

    #[tokio::test]
    async fn test_empty_source_result_installs_fallback() {
        let source = ScriptedSource::new(vec![Ok(Vec::new())]);
        let registry =
            SubscriberRegistry::new(source, Duration::from_secs(45), "default", fallback_list());

        registry.refresh().await;

        let stats = registry.stats();
        assert_eq!(stats.subscriber_count, 1);
        assert!(stats.using_fallback);
    }

    #[tokio::test]
    async fn test_valid_cache_skips_source() {
        // One scripted response; a second fetch would fail the test via
        // the exhausted-source error
        let source = ScriptedSource::new(vec![Ok(vec![source_row(
            "orders-hook",
            json!(["order.*"]),
        )])]);
        let registry =
            SubscriberRegistry::new(source, Duration::from_secs(60), "default", Vec::new());

        assert_eq!(registry.resolve("order.confirmed").await.len(), 1);
        assert_eq!(registry.resolve("order.confirmed").await.len(), 1);
        assert!(registry.stats().is_valid);
    }

    #[tokio::test]
    async fn test_by_name_and_all_active() {
        let source = ScriptedSource::new(vec![Ok(vec![
            source_row("orders-hook", json!(["order.*"])),
            source_row("products-hook", json!(["product.*"])),
        ])]);
        let registry =
            SubscriberRegistry::new(source, Duration::from_secs(45), "default", Vec::new());

        let found = registry.by_name("products-hook").await;
        assert_eq!(found.unwrap().name, "products-hook");
        assert!(registry.by_name("missing").await.is_none());
        assert_eq!(registry.all_active().await.len(), 2);
    }

    #[tokio::test]
    async fn test_http_source_fetch_and_normalization() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/webhook_subscribers"))
            .and(query_param("is_active", "eq.true"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": "uuid-1",
                    "name": "webhook-logger",
                    "target_url": "https://receiver.example.com/logger",
                    "event_patterns": ["product.*", "order.*"],
                    "is_active": true,
                    "secret_key": "shared_secret_123"
                },
                {
                    "id": "uuid-2",
                    "name": "csv-hook",
                    "target_url": "https://receiver.example.com/csv",
                    "event_patterns": "order.confirmed,order.cancelled",
                    "is_active": true
                }
            ])))
            .mount(&server)
            .await;

        let source =
            HttpSubscriberSource::new(server.uri(), "anon-key", Duration::from_secs(5)).unwrap();
        let rows = source.fetch_active().await.unwrap();
        assert_eq!(rows.len(), 2);

        let normalized: Vec<Subscriber> = rows
            .into_iter()
            .map(|row| Subscriber::from_source(row, "default_secret"))
            .collect();

        assert_eq!(normalized[0].secret_key, "shared_secret_123");
        assert_eq!(normalized[0].event_patterns, vec!["product.*", "order.*"]);
        assert_eq!(normalized[1].secret_key, "default_secret");
        assert_eq!(
            normalized[1].event_patterns,
            vec!["order.confirmed", "order.cancelled"]
        );
    }

    #[tokio::test]
    async fn test_http_source_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source =
            HttpSubscriberSource::new(server.uri(), "anon-key", Duration::from_secs(5)).unwrap();
        assert!(source.fetch_active().await.is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_http_source_returns_empty() {
        let source = HttpSubscriberSource::new("", "", Duration::from_secs(5)).unwrap();
        assert!(source.fetch_active().await.unwrap().is_empty());
    }
}
