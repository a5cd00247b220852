//! Inbound event bus (NATS JetStream).
//!
//! The bus itself is an external collaborator; this module only owns the
//! durable consumer and the ack/nak protocol: a handler error NAKs the
//! message so the bus redelivers it, which is safe because processing is
//! idempotent downstream.

use async_nats::jetstream::{self, consumer::pull::Config as PullConfig, consumer::AckPolicy, AckKind};
use async_nats::ConnectOptions;
use futures::StreamExt;
use std::fmt::Display;
use std::future::Future;
use tracing::{debug, error, info, warn};

use crate::{InfraError, Result};

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub url: String,
    /// Stream holding the domain events
    pub stream: String,
    /// Durable consumer name, shared across instances for queue semantics
    pub durable: String,
    /// Subjects bound to the stream
    pub subjects: Vec<String>,
    pub name: Option<String>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            url: String::from("nats://127.0.0.1:4222"),
            stream: String::from("EVENTS"),
            durable: String::from("webhook-relay"),
            subjects: vec![String::from("product.*"), String::from("order.*")],
            name: Some(String::from("webhook-relay")),
        }
    }
}

impl EventBusConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    pub fn with_durable(mut self, durable: impl Into<String>) -> Self {
        self.durable = durable.into();
        self
    }

    pub fn with_subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }
}

pub struct EventBusConsumer {
    client: async_nats::Client,
    consumer: jetstream::consumer::Consumer<PullConfig>,
    config: EventBusConfig,
}

impl EventBusConsumer {
    pub async fn connect(config: EventBusConfig) -> Result<Self> {
        info!("Connecting to event bus at {}", config.url);

        let mut options = ConnectOptions::new();
        if let Some(name) = &config.name {
            options = options.name(name);
        }

        let client = options.connect(config.url.as_str()).await.map_err(|e| {
            error!("Failed to connect to event bus: {}", e);
            InfraError::Messaging(format!("Failed to connect to event bus: {e}"))
        })?;

        let context = jetstream::new(client.clone());

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream.clone(),
                subjects: config.subjects.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| InfraError::Messaging(format!("Failed to open stream: {e}")))?;

        let consumer = stream
            .get_or_create_consumer(
                &config.durable,
                PullConfig {
                    durable_name: Some(config.durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| InfraError::Messaging(format!("Failed to open consumer: {e}")))?;

        info!(
            stream = %config.stream,
            durable = %config.durable,
            "Event bus consumer established"
        );

        Ok(Self {
            client,
            consumer,
            config,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Consume messages until the stream ends.
    ///
    /// Handler success ACKs the message; handler failure NAKs it so the bus
    /// redelivers. Ack transport errors are logged, not surfaced: an un-acked
    /// message redelivers on its own and redelivery is idempotent downstream.
    pub async fn run<F, Fut, E>(&self, handler: F) -> Result<()>
    where
        F: Fn(String, Vec<u8>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Display,
    {
        let mut messages = self
            .consumer
            .messages()
            .await
            .map_err(|e| InfraError::Messaging(format!("Failed to start consuming: {e}")))?;

        info!(subjects = ?self.config.subjects, "Listening for domain events");

        while let Some(message) = messages.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Failed to receive message");
                    continue;
                }
            };

            let subject = message.subject.to_string();
            debug!(subject = %subject, "Received event");

            match handler(subject.clone(), message.payload.to_vec()).await {
                Ok(()) => {
                    if let Err(e) = message.ack().await {
                        warn!(subject = %subject, error = %e, "Failed to ack message");
                    }
                }
                Err(e) => {
                    warn!(subject = %subject, error = %e, "Event processing failed, requeueing");
                    if let Err(e) = message.ack_with(AckKind::Nak(None)).await {
                        warn!(subject = %subject, error = %e, "Failed to nak message");
                    }
                }
            }
        }

        info!("Event bus stream closed");
        Ok(())
    }
}
