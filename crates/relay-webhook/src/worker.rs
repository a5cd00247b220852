//! Signed HTTP delivery of a single queued job.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use relay_core::payload::WebhookPayload;

use crate::queue::DeliveryJob;
use crate::registry::SubscriberRegistry;
use crate::signature::{unix_timestamp, WebhookSigner, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::{Result, WebhookError};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl DeliveryResult {
    fn failure(status_code: Option<u16>, error: String, duration_ms: u64) -> Self {
        Self {
            success: false,
            status_code,
            error: Some(error),
            duration_ms,
        }
    }
}

/// Seam between the queue's retry machinery and the HTTP delivery below;
/// tests substitute scripted implementations.
#[async_trait]
pub trait DeliverJob: Send + Sync {
    async fn deliver(&self, job: &DeliveryJob) -> DeliveryResult;
}

/// Performs signed webhook POSTs.
///
/// The subscriber's secret is resolved by name at delivery time so a secret
/// rotated between enqueue and delivery is picked up; a subscriber that
/// disappeared from the registry falls back to the process-wide secret.
pub struct DeliveryWorker {
    client: reqwest::Client,
    registry: Arc<SubscriberRegistry>,
    default_secret: String,
}

impl DeliveryWorker {
    pub fn new(registry: Arc<SubscriberRegistry>, default_secret: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| WebhookError::Http(e.to_string()))?;

        Ok(Self {
            client,
            registry,
            default_secret: default_secret.into(),
        })
    }

    async fn resolve_secret(&self, subscriber_name: &str) -> String {
        match self.registry.by_name(subscriber_name).await {
            Some(subscriber) => subscriber.secret_key,
            None => self.default_secret.clone(),
        }
    }

    /// One signed POST. The signature covers the exact serialized bytes sent
    /// on the wire; 2xx is success, everything else is a failure for the
    /// queue's retry machinery.
    pub async fn send(&self, url: &str, payload: &WebhookPayload, secret: &str) -> DeliveryResult {
        let started = Instant::now();

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                return DeliveryResult::failure(None, format!("Serialization failed: {e}"), 0)
            }
        };

        let signer = WebhookSigner::new(secret);
        let signature = signer.sign(&body);
        let timestamp = unix_timestamp();

        let result = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .body(body)
            .send()
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    info!(url = %url, status = %status, duration_ms, "Webhook delivered");
                    DeliveryResult {
                        success: true,
                        status_code: Some(status.as_u16()),
                        error: None,
                        duration_ms,
                    }
                } else {
                    warn!(url = %url, status = %status, "Webhook received non-success response");
                    DeliveryResult::failure(
                        Some(status.as_u16()),
                        format!("Unexpected status {status}"),
                        duration_ms,
                    )
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Webhook delivery failed");
                DeliveryResult::failure(
                    e.status().map(|s| s.as_u16()),
                    e.to_string(),
                    duration_ms,
                )
            }
        }
    }
}

#[async_trait]
impl DeliverJob for DeliveryWorker {
    async fn deliver(&self, job: &DeliveryJob) -> DeliveryResult {
        let secret = self.resolve_secret(&job.subscriber_name).await;
        self.send(&job.url, &job.payload, &secret).await
    }
}
