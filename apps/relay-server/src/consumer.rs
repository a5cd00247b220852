//! Inbound event consumption: explicit event-name → handler mapping.
//!
//! The router is a plain lookup table built at startup. Unmapped subjects
//! are acknowledged and logged; handler failures propagate so the bus
//! consumer NAKs for redelivery.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

use relay_core::events::{DomainEvent, HANDLED_EVENTS};
use relay_infra::{EventBusConfig, EventBusConsumer};
use relay_webhook::EventDispatcher;

use crate::app::AppState;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type Handler = Box<dyn Fn(Map<String, Value>) -> HandlerFuture + Send + Sync>;

/// Event-name keyed dispatch table.
pub struct EventRouter {
    handlers: HashMap<&'static str, Handler>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn on(mut self, event: &'static str, handler: Handler) -> Self {
        self.handlers.insert(event, handler);
        self
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Run the handler mapped to `event`; false when none is mapped.
    pub async fn dispatch(&self, event: &str, data: Map<String, Value>) -> Result<bool> {
        match self.handlers.get(event) {
            Some(handler) => {
                handler(data).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Map every handled domain event to the dispatcher's fan-out.
pub fn build_router(dispatcher: Arc<EventDispatcher>) -> EventRouter {
    let mut router = EventRouter::new();

    for event in HANDLED_EVENTS {
        let dispatcher = Arc::clone(&dispatcher);
        router = router.on(
            event,
            Box::new(move |data| {
                let dispatcher = Arc::clone(&dispatcher);
                Box::pin(async move {
                    dispatcher.process_event(event, data).await;
                    Ok(())
                })
            }),
        );
    }

    router
}

/// Connect to the bus and consume until shutdown.
pub async fn run(state: AppState) -> Result<()> {
    let router = Arc::new(build_router(Arc::clone(&state.dispatcher)));

    let bus_config = EventBusConfig::new(state.config.bus.url.clone())
        .with_stream(state.config.bus.stream.clone())
        .with_durable(state.config.bus.durable.clone());

    let consumer = EventBusConsumer::connect(bus_config)
        .await
        .context("Failed to connect to event bus")?;

    info!(events = ?HANDLED_EVENTS, "Listening for domain events");

    consumer
        .run(|subject, payload| {
            let router = Arc::clone(&router);
            async move {
                let event = DomainEvent::from_bus(&subject, &payload)
                    .map_err(|e| anyhow::anyhow!("Malformed event body: {e}"))?;

                if !router.dispatch(&event.name, event.data).await? {
                    debug!(subject = %subject, "No handler mapped for event, acknowledging");
                }

                Ok::<(), anyhow::Error>(())
            }
        })
        .await
        .context("Event consumption failed")?;

    Ok(())
}
