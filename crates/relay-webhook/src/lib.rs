//! Webhook delivery pipeline
//!
//! This crate is the event-to-webhook core:
//! - Subscriber registry with TTL cache and fallback
//! - HMAC-SHA256 signing and receiver-side verification
//! - Retrying delivery queue with bounded concurrency and rate limiting
//! - Signed HTTP delivery worker
//! - Event dispatcher orchestrating idempotent fan-out

// Module order matters due to dependencies
pub mod subscriber;
pub mod registry;
pub mod signature;
pub mod worker;
pub mod queue;
pub mod dispatcher;

pub use dispatcher::EventDispatcher;
pub use queue::{DeliveryJob, DeliveryQueue, JobRecord, JobState, QueueCounts, RetryPolicy};
pub use registry::{CacheStats, HttpSubscriberSource, SubscriberRegistry, SubscriberSource};
pub use signature::{WebhookSigner, WebhookVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
pub use subscriber::{SourceSubscriber, Subscriber};
pub use worker::{DeliverJob, DeliveryResult, DeliveryWorker};

use thiserror::Error;

/// Webhook errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Subscriber source fetch failed: {0}")]
    SourceFetch(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
