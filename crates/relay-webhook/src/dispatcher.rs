//! Event dispatcher: orchestrates the idempotent fan-out.
//!
//! Claims the event before fan-out so a crash mid-fan-out cannot cause a
//! second full fan-out on redelivery; the fan-out itself is further protected
//! by per-job idempotent ids in the queue. Correctness under concurrent
//! dispatchers comes from the store's atomics and the queue's id dedupe, not
//! from local locking.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use relay_core::idempotency::IdempotencyStore;
use relay_core::payload::transform_payload;

use crate::queue::{DeliveryJob, DeliveryQueue};
use crate::registry::SubscriberRegistry;

pub struct EventDispatcher {
    registry: Arc<SubscriberRegistry>,
    idempotency: Arc<dyn IdempotencyStore>,
    queue: Arc<DeliveryQueue>,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        idempotency: Arc<dyn IdempotencyStore>,
        queue: Arc<DeliveryQueue>,
    ) -> Self {
        Self {
            registry,
            idempotency,
            queue,
        }
    }

    /// Process one inbound event: transform, claim, resolve, fan out.
    ///
    /// Duplicates and unmatched events are no-ops, not errors. All queue
    /// writes complete before this returns, so the caller can acknowledge
    /// the inbound message afterwards.
    pub async fn process_event(&self, event_name: &str, data: Map<String, Value>) {
        let payload = transform_payload(event_name, data);
        let idempotency_key = payload.idempotency_key.clone();

        info!(event = event_name, key = %idempotency_key, "Processing event");

        if self
            .idempotency
            .is_processed(event_name, &idempotency_key)
            .await
        {
            warn!(
                event = event_name,
                key = %idempotency_key,
                "Event already processed, skipping"
            );
            return;
        }

        // Claim before fan-out
        self.idempotency
            .mark_processed(event_name, &idempotency_key)
            .await;

        let subscribers = self.registry.resolve(event_name).await;
        if subscribers.is_empty() {
            warn!(event = event_name, "No active subscribers for event");
            return;
        }

        info!(
            event = event_name,
            count = subscribers.len(),
            "Fanning out webhooks"
        );

        for subscriber in subscribers {
            let job = DeliveryJob::new(&subscriber.url, payload.clone(), &subscriber.name);
            if self.queue.enqueue(job) {
                debug!(
                    subscriber = %subscriber.name,
                    event = event_name,
                    "Queued webhook"
                );
            }
        }
    }
}
