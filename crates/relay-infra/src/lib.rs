pub mod bus;
pub mod idempotency;

pub use bus::{EventBusConfig, EventBusConsumer};
pub use idempotency::RedisIdempotencyStore;

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, InfraError>;
