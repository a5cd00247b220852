//! Domain event names and the inbound event envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stock reserved for an order (emitted by the products service).
pub const PRODUCT_STOCK_RESERVED: &str = "product.stockReserved";
/// Order confirmed (emitted by the orders service).
pub const ORDER_CONFIRMED: &str = "order.confirmed";
/// Order cancelled (emitted by the orders service).
pub const ORDER_CANCELLED: &str = "order.cancelled";
/// Stock released back after a cancellation.
pub const PRODUCT_STOCK_RELEASED: &str = "product.stockReleased";

/// Every event name this service consumes from the bus.
pub const HANDLED_EVENTS: [&str; 4] = [
    PRODUCT_STOCK_RESERVED,
    ORDER_CONFIRMED,
    ORDER_CANCELLED,
    PRODUCT_STOCK_RELEASED,
];

/// An inbound domain event as received from the bus.
///
/// The body is an arbitrary mapping; the producer embeds an idempotency key
/// under `idempotencyKey` or `idempotency_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub name: String,
    pub data: Map<String, Value>,
}

impl DomainEvent {
    pub fn new(name: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Decode an event body received on `subject`.
    pub fn from_bus(subject: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        let data: Map<String, Value> = serde_json::from_slice(payload)?;
        Ok(Self::new(subject, data))
    }
}
