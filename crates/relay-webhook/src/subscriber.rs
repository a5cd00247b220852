//! Subscriber model and event-pattern matching.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscriber row as returned by the external registry source.
///
/// `event_patterns` arrives in whatever shape the row was written with:
/// a proper array, a JSON-encoded string, or a comma-separated string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSubscriber {
    pub id: String,
    pub name: String,
    pub target_url: String,
    #[serde(default)]
    pub event_patterns: Option<Value>,
    pub is_active: bool,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Normalized subscriber snapshot used by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscriber {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub event_patterns: Vec<String>,
    pub is_active: bool,
}

impl Subscriber {
    /// Normalize a source row, substituting `default_secret` when the row
    /// carries no secret of its own.
    pub fn from_source(source: SourceSubscriber, default_secret: &str) -> Self {
        Self {
            id: source.id,
            name: source.name,
            url: source.target_url,
            secret_key: source
                .secret_key
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default_secret.to_string()),
            event_patterns: normalize_event_patterns(source.event_patterns.as_ref()),
            is_active: source.is_active,
        }
    }

    /// Whether this subscriber wants `event_name`. Inactive subscribers
    /// never match; any one matching pattern suffices.
    pub fn matches(&self, event_name: &str) -> bool {
        self.is_active
            && self
                .event_patterns
                .iter()
                .any(|pattern| event_matches_pattern(event_name, pattern))
    }
}

/// Pattern semantics:
/// - `"*"` matches every event name
/// - a pattern ending in `".*"` matches iff the name starts with the pattern
///   minus its trailing `"*"` (`"product.*"` matches `"product.stockReserved"`)
/// - anything else is exact equality
pub fn event_matches_pattern(event_name: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if pattern.ends_with(".*") {
        let prefix = &pattern[..pattern.len() - 1];
        return event_name.starts_with(prefix);
    }

    event_name == pattern
}

/// Normalize the source's pattern field to a pattern list.
///
/// Accepts an array of strings, a JSON-encoded array string, or a CSV
/// string; anything unparseable falls back to `["*"]`.
pub fn normalize_event_patterns(patterns: Option<&Value>) -> Vec<String> {
    match patterns {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(raw)) => {
            if raw.trim_start().starts_with('[') {
                if let Ok(parsed) = serde_json::from_str::<Vec<String>>(raw) {
                    return parsed;
                }
            }
            raw.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        }
        _ => vec![String::from("*")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscriber(patterns: &[&str], active: bool) -> Subscriber {
        Subscriber {
            id: String::from("sub-1"),
            name: String::from("logger"),
            url: String::from("https://example.com/hook"),
            secret_key: String::from("secret"),
            event_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            is_active: active,
        }
    }

    #[test]
    fn test_wildcard_matches_everything() {
        assert!(event_matches_pattern("product.stockReserved", "*"));
        assert!(event_matches_pattern("order.confirmed", "*"));
        assert!(event_matches_pattern("anything", "*"));
    }

    #[test]
    fn test_prefix_pattern() {
        assert!(event_matches_pattern("product.stockReserved", "product.*"));
        assert!(event_matches_pattern("product.stockReleased", "product.*"));
        assert!(!event_matches_pattern("order.confirmed", "product.*"));
        // The dot is part of the prefix
        assert!(!event_matches_pattern("products.created", "product.*"));
    }

    #[test]
    fn test_exact_pattern() {
        assert!(event_matches_pattern("order.confirmed", "order.confirmed"));
        assert!(!event_matches_pattern("order.cancelled", "order.confirmed"));
        // A bare trailing "*" without the dot is not a prefix pattern
        assert!(!event_matches_pattern("orderly", "order*"));
    }

    #[test]
    fn test_subscriber_matching() {
        let sub = subscriber(&["product.*", "order.confirmed"], true);

        assert!(sub.matches("product.stockReserved"));
        assert!(sub.matches("order.confirmed"));
        assert!(!sub.matches("order.cancelled"));
    }

    #[test]
    fn test_inactive_never_matches() {
        let sub = subscriber(&["*"], false);
        assert!(!sub.matches("order.confirmed"));
    }

    #[test]
    fn test_normalize_array() {
        let value = json!(["product.*", "order.confirmed"]);
        assert_eq!(
            normalize_event_patterns(Some(&value)),
            vec!["product.*", "order.confirmed"]
        );
    }

    #[test]
    fn test_normalize_json_string() {
        let value = json!("[\"product.*\",\"order.*\"]");
        assert_eq!(
            normalize_event_patterns(Some(&value)),
            vec!["product.*", "order.*"]
        );
    }

    #[test]
    fn test_normalize_csv_string() {
        let value = json!("product.stockReserved, order.confirmed ,,");
        assert_eq!(
            normalize_event_patterns(Some(&value)),
            vec!["product.stockReserved", "order.confirmed"]
        );
    }

    #[test]
    fn test_normalize_malformed_json_falls_back_to_csv() {
        let value = json!("[not-json, order.confirmed");
        assert_eq!(
            normalize_event_patterns(Some(&value)),
            vec!["[not-json", "order.confirmed"]
        );
    }

    #[test]
    fn test_normalize_missing_defaults_to_wildcard() {
        assert_eq!(normalize_event_patterns(None), vec!["*"]);
        assert_eq!(normalize_event_patterns(Some(&json!(42))), vec!["*"]);
    }

    #[test]
    fn test_from_source_secret_fallback() {
        let source = SourceSubscriber {
            id: String::from("uuid-1"),
            name: String::from("logger"),
            target_url: String::from("https://example.com/hook"),
            event_patterns: Some(json!(["*"])),
            is_active: true,
            secret_key: None,
            created_at: None,
            updated_at: None,
        };

        let sub = Subscriber::from_source(source, "shared_secret");
        assert_eq!(sub.secret_key, "shared_secret");
        assert_eq!(sub.url, "https://example.com/hook");
    }

    #[test]
    fn test_from_source_empty_secret_falls_back() {
        let source = SourceSubscriber {
            id: String::from("uuid-1"),
            name: String::from("logger"),
            target_url: String::from("https://example.com/hook"),
            event_patterns: None,
            is_active: true,
            secret_key: Some(String::new()),
            created_at: None,
            updated_at: None,
        };

        let sub = Subscriber::from_source(source, "shared_secret");
        assert_eq!(sub.secret_key, "shared_secret");
        assert_eq!(sub.event_patterns, vec!["*"]);
    }
}
