use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub bus: BusConfig,
    pub registry: RegistryConfig,
    pub webhook: WebhookConfig,
    pub queue: QueueConfig,
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("RELAY")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3003)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("bus.url", "nats://127.0.0.1:4222")?
            .set_default("bus.stream", "EVENTS")?
            .set_default("bus.durable", "webhook-relay")?
            .set_default("registry.url", "")?
            .set_default("registry.api_key", "")?
            .set_default("registry.cache_ttl_ms", 45_000)?
            .set_default("registry.fetch_timeout_ms", 5_000)?
            .set_default("webhook.secret", "dev_secret_key_123456")?
            .set_default("webhook.logger_url", "")?
            .set_default("webhook.notifier_url", "")?
            .set_default("queue.max_attempts", 5)?
            .set_default("queue.base_delay_ms", 1_000)?
            .set_default("queue.max_delay_ms", 60_000)?
            .set_default("queue.concurrency", 5)?
            .set_default("queue.rate_per_sec", 5)?
            .set_default("queue.retain_completed", 100)?
            .set_default("queue.retain_failed", 500)?;

        let config = builder.build()?;
        config.try_deserialize()
    }
}

/// HTTP server configuration (admin/health surface)
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Redis configuration (idempotency records)
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Event bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub url: String,
    /// JetStream stream holding the domain events
    pub stream: String,
    /// Durable consumer name; shared across instances for queue semantics
    pub durable: String,
}

/// Subscriber registry source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the subscriber source; empty disables fetching
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl RegistryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

fn default_cache_ttl_ms() -> u64 {
    45_000
}

fn default_fetch_timeout_ms() -> u64 {
    5_000
}

/// Outbound webhook configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Process-wide signing secret; used when a subscriber has none of its own
    pub secret: String,
    /// Fallback receiver installed when the registry source is unreachable
    pub logger_url: String,
    /// Second fallback receiver, optional
    pub notifier_url: String,
}

/// Delivery queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub concurrency: usize,
    pub rate_per_sec: u32,
    pub retain_completed: usize,
    pub retain_failed: usize,
}

impl QueueConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
