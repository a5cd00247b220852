pub mod config;
pub mod events;
pub mod idempotency;
pub mod payload;
pub mod policy;

// Re-export specific items to avoid ambiguity
pub use config::*;
pub use events::DomainEvent;
pub use payload::{transform_payload, PayloadMetadata, WebhookPayload};
pub use policy::FailurePolicy;

// Re-export the idempotency seam (implementations live in relay-infra)
pub use idempotency::{IdempotencyStore, MemoryIdempotencyStore};
