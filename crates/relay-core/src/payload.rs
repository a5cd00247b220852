//! Webhook payload model and the event-to-payload transformer.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field names under which producers embed the idempotency key.
pub const IDEMPOTENCY_KEY_ALIASES: [&str; 2] = ["idempotencyKey", "idempotency_key"];

/// Identifies this service in outbound payload metadata.
pub const PAYLOAD_SOURCE: &str = "webhook-relay";
/// Payload schema version.
pub const PAYLOAD_VERSION: &str = "1.0";

/// Metadata block attached to every outbound payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    pub source: String,
    pub version: String,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
}

/// Wire-level webhook envelope, immutable once built.
///
/// The signature is computed over the serialized bytes of this exact
/// structure, so field order here is the wire order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub idempotency_key: String,
    pub timestamp: String,
    pub data: Map<String, Value>,
    pub metadata: PayloadMetadata,
}

/// Normalize a raw internal event into the wire-level webhook envelope.
///
/// Pops the idempotency key from either accepted alias (both aliases are
/// stripped from the carried data either way) and generates a fresh key when
/// the producer supplied none. The correlation id always mirrors the
/// idempotency key.
pub fn transform_payload(event_name: &str, mut data: Map<String, Value>) -> WebhookPayload {
    let mut idempotency_key: Option<String> = None;

    for alias in IDEMPOTENCY_KEY_ALIASES {
        if let Some(value) = data.remove(alias) {
            if idempotency_key.is_none() {
                idempotency_key = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                });
            }
        }
    }

    let idempotency_key = idempotency_key.unwrap_or_else(|| Uuid::new_v4().to_string());

    WebhookPayload {
        event: event_name.to_string(),
        idempotency_key: idempotency_key.clone(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        data,
        metadata: PayloadMetadata {
            source: PAYLOAD_SOURCE.to_string(),
            version: PAYLOAD_VERSION.to_string(),
            correlation_id: idempotency_key,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data_from(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_camel_case_alias_wins() {
        let data = data_from(json!({
            "orderId": "o-1",
            "idempotencyKey": "camel",
            "idempotency_key": "snake",
        }));

        let payload = transform_payload("order.confirmed", data);

        assert_eq!(payload.idempotency_key, "camel");
        assert_eq!(payload.metadata.correlation_id, "camel");
    }

    #[test]
    fn test_snake_case_alias_accepted() {
        let data = data_from(json!({"idempotency_key": "snake"}));
        let payload = transform_payload("order.confirmed", data);
        assert_eq!(payload.idempotency_key, "snake");
    }

    #[test]
    fn test_aliases_stripped_from_data() {
        let data = data_from(json!({
            "orderId": "o-1",
            "idempotencyKey": "k",
            "idempotency_key": "k",
        }));

        let payload = transform_payload("order.confirmed", data);

        assert!(!payload.data.contains_key("idempotencyKey"));
        assert!(!payload.data.contains_key("idempotency_key"));
        assert_eq!(payload.data["orderId"], "o-1");
    }

    #[test]
    fn test_missing_key_generates_one() {
        let data = data_from(json!({"orderId": "o-1"}));
        let payload = transform_payload("order.confirmed", data);

        assert!(!payload.idempotency_key.is_empty());
        assert!(Uuid::parse_str(&payload.idempotency_key).is_ok());
        assert_eq!(payload.metadata.correlation_id, payload.idempotency_key);
    }

    #[test]
    fn test_metadata_and_timestamp() {
        let payload = transform_payload("product.stockReserved", Map::new());

        assert_eq!(payload.event, "product.stockReserved");
        assert_eq!(payload.metadata.source, "webhook-relay");
        assert_eq!(payload.metadata.version, "1.0");
        assert!(chrono::DateTime::parse_from_rfc3339(&payload.timestamp).is_ok());
    }

    #[test]
    fn test_correlation_id_serializes_camel_case() {
        let payload = transform_payload("order.confirmed", data_from(json!({"idempotencyKey": "k1"})));
        let wire = serde_json::to_value(&payload).unwrap();

        assert_eq!(wire["metadata"]["correlationId"], "k1");
        assert_eq!(wire["idempotency_key"], "k1");
    }
}
