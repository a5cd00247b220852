//! Application state and explicit wiring.
//!
//! Every component is constructed here and handed its dependencies through
//! constructors; there is no container or implicit registration.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use relay_core::config::RelayConfig;
use relay_core::idempotency::IdempotencyStore;
use relay_infra::RedisIdempotencyStore;
use relay_webhook::{
    DeliveryQueue, DeliveryWorker, EventDispatcher, HttpSubscriberSource, RetryPolicy,
    Subscriber, SubscriberRegistry,
};

use crate::cli::Args;
use crate::server::Server;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    pub registry: Arc<SubscriberRegistry>,
    pub queue: Arc<DeliveryQueue>,
    pub dispatcher: Arc<EventDispatcher>,
    pub idempotency: Arc<RedisIdempotencyStore>,
    pub started_at: Instant,
}

impl AppState {
    /// Create the application state with all dependencies
    pub async fn new() -> Result<Self> {
        info!("Initializing application components");

        let config = RelayConfig::load().context("Failed to load configuration")?;

        let idempotency = Arc::new(
            RedisIdempotencyStore::connect(&config.redis.url)
                .await
                .context("Failed to connect to Redis")?,
        );

        let source = HttpSubscriberSource::new(
            config.registry.url.clone(),
            config.registry.api_key.clone(),
            config.registry.fetch_timeout(),
        )
        .context("Failed to build subscriber source")?;

        let registry = Arc::new(SubscriberRegistry::new(
            Arc::new(source),
            config.registry.cache_ttl(),
            config.webhook.secret.clone(),
            build_fallback_subscribers(&config),
        ));

        // Load the initial subscriber snapshot before consuming events
        registry.refresh().await;

        let queue = DeliveryQueue::new(RetryPolicy {
            max_attempts: config.queue.max_attempts,
            base_delay: config.queue.base_delay(),
            max_delay: config.queue.max_delay(),
            retain_completed: config.queue.retain_completed,
            retain_failed: config.queue.retain_failed,
            ..Default::default()
        });

        let worker = Arc::new(
            DeliveryWorker::new(Arc::clone(&registry), config.webhook.secret.clone())
                .context("Failed to build delivery worker")?,
        );
        queue.start_workers(worker, config.queue.concurrency, config.queue.rate_per_sec);

        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&idempotency) as Arc<dyn IdempotencyStore>,
            Arc::clone(&queue),
        ));

        Ok(Self {
            config,
            registry,
            queue,
            dispatcher,
            idempotency,
            started_at: Instant::now(),
        })
    }
}

/// Static receivers installed when the registry source has nothing to offer.
fn build_fallback_subscribers(config: &RelayConfig) -> Vec<Subscriber> {
    let mut fallback = Vec::new();

    if !config.webhook.logger_url.is_empty() {
        fallback.push(SubscriberRegistry::fallback_subscriber(
            "logger",
            "webhook-logger",
            &config.webhook.logger_url,
            &config.webhook.secret,
        ));
    }

    if !config.webhook.notifier_url.is_empty() {
        fallback.push(SubscriberRegistry::fallback_subscriber(
            "notifier",
            "telegram-notifier",
            &config.webhook.notifier_url,
            &config.webhook.secret,
        ));
    }

    fallback
}

/// Main application
pub struct App {
    args: Args,
    state: AppState,
}

impl App {
    /// Build the application with all dependencies
    pub async fn build(args: Args) -> Result<Self> {
        let state = AppState::new().await?;
        Ok(Self { args, state })
    }

    /// Run until shutdown: event consumption and the admin HTTP surface.
    pub async fn run(self) -> Result<()> {
        let stats = self.state.registry.stats();
        info!(
            subscribers = stats.subscriber_count,
            using_fallback = stats.using_fallback,
            "Subscriber cache loaded"
        );

        let consumer_state = self.state.clone();
        let consumer = tokio::spawn(async move {
            if let Err(e) = crate::consumer::run(consumer_state).await {
                error!("Event consumer error: {:#}", e);
            }
        });

        let server = Server::new(self.args, self.state)?;
        server.run().await?;

        consumer.abort();
        Ok(())
    }
}
