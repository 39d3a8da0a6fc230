//! NATS JetStream backend for the step and trigger queues.

use async_nats::jetstream::{
    self,
    consumer::pull,
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
};
use async_trait::async_trait;

use crate::dispatch::{QueueClient, StepMessage, TriggerMessage};
use crate::error::QueueError;

/// Subject step messages are published to.
pub const STEP_SUBJECT: &str = "workflows.steps";

/// Subject trigger events arrive on.
pub const TRIGGER_SUBJECT: &str = "workflows.triggers";

/// Default stream name backing the step queue.
pub const DEFAULT_STEP_STREAM: &str = "WORKFLOW_STEPS";

/// Default stream name backing the trigger queue.
pub const DEFAULT_TRIGGER_STREAM: &str = "WORKFLOW_TRIGGERS";

/// Default durable consumer name for the trigger queue worker.
pub const DEFAULT_TRIGGER_CONSUMER: &str = "workflow-trigger-worker";

/// Connection settings for the queue backend.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Override for the step stream name.
    pub step_stream_name: Option<String>,
    /// Override for the trigger stream name.
    pub trigger_stream_name: Option<String>,
    /// Override for the trigger consumer's durable name.
    pub trigger_consumer_name: Option<String>,
}

impl NatsConfig {
    /// Configuration for the given server URL with default stream names.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            step_stream_name: None,
            trigger_stream_name: None,
            trigger_consumer_name: None,
        }
    }

    /// Step stream name, falling back to [`DEFAULT_STEP_STREAM`].
    #[must_use]
    pub fn step_stream_name(&self) -> &str {
        self.step_stream_name.as_deref().unwrap_or(DEFAULT_STEP_STREAM)
    }

    /// Trigger stream name, falling back to [`DEFAULT_TRIGGER_STREAM`].
    #[must_use]
    pub fn trigger_stream_name(&self) -> &str {
        self.trigger_stream_name
            .as_deref()
            .unwrap_or(DEFAULT_TRIGGER_STREAM)
    }

    /// Durable consumer name, falling back to [`DEFAULT_TRIGGER_CONSUMER`].
    #[must_use]
    pub fn trigger_consumer_name(&self) -> &str {
        self.trigger_consumer_name
            .as_deref()
            .unwrap_or(DEFAULT_TRIGGER_CONSUMER)
    }
}

/// JetStream-backed queue client.
#[derive(Clone)]
pub struct NatsQueue {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsQueue {
    /// Connect to NATS and ensure both queue streams exist.
    ///
    /// Both streams use work-queue retention: each message is consumed by
    /// exactly one worker and dropped once acknowledged.
    pub async fn connect(config: NatsConfig) -> Result<Self, QueueError> {
        let client = async_nats::connect(&config.url).await.map_err(|error| {
            QueueError::ConnectionFailed {
                message: error.to_string(),
            }
        })?;
        let jetstream = jetstream::new(client);

        let queue = Self { jetstream, config };
        queue.ensure_streams().await?;
        Ok(queue)
    }

    async fn ensure_streams(&self) -> Result<(), QueueError> {
        self.jetstream
            .get_or_create_stream(StreamConfig {
                name: self.config.step_stream_name().to_owned(),
                subjects: vec![STEP_SUBJECT.to_owned()],
                storage: StorageType::File,
                retention: RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .map_err(|error| QueueError::ConnectionFailed {
                message: error.to_string(),
            })?;

        self.jetstream
            .get_or_create_stream(StreamConfig {
                name: self.config.trigger_stream_name().to_owned(),
                subjects: vec![TRIGGER_SUBJECT.to_owned()],
                storage: StorageType::File,
                retention: RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .map_err(|error| QueueError::ConnectionFailed {
                message: error.to_string(),
            })?;

        Ok(())
    }

    /// Durable pull consumer on the trigger stream.
    ///
    /// Messages are acknowledged individually; anything left unacknowledged
    /// is redelivered to a later batch.
    pub async fn trigger_consumer(
        &self,
    ) -> Result<jetstream::consumer::Consumer<pull::Config>, QueueError> {
        let stream = self
            .jetstream
            .get_stream(self.config.trigger_stream_name())
            .await
            .map_err(|error| QueueError::ConsumeFailed {
                message: error.to_string(),
            })?;

        let consumer_config = pull::Config {
            durable_name: Some(self.config.trigger_consumer_name().to_owned()),
            ..Default::default()
        };

        stream
            .create_consumer(consumer_config)
            .await
            .map_err(|error| QueueError::ConsumeFailed {
                message: error.to_string(),
            })
    }

    /// Serialize and publish, waiting for the broker's ack.
    async fn publish_json<T: serde::Serialize + Sync>(
        &self,
        subject: &'static str,
        message: &T,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(message).map_err(|error| QueueError::PublishFailed {
            message: error.to_string(),
        })?;

        self.jetstream
            .publish(subject, payload.into())
            .await
            .map_err(|error| QueueError::PublishFailed {
                message: error.to_string(),
            })?
            .await
            .map_err(|error| QueueError::PublishFailed {
                message: error.to_string(),
            })?;

        Ok(())
    }
}

#[async_trait]
impl QueueClient for NatsQueue {
    async fn publish_step(&self, message: StepMessage) -> Result<(), QueueError> {
        self.publish_json(STEP_SUBJECT, &message).await
    }

    async fn publish_trigger(&self, message: TriggerMessage) -> Result<(), QueueError> {
        self.publish_json(TRIGGER_SUBJECT, &message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_uses_default_names() {
        let config = NatsConfig::new("nats://localhost:4222");

        assert_eq!(config.step_stream_name(), DEFAULT_STEP_STREAM);
        assert_eq!(config.trigger_stream_name(), DEFAULT_TRIGGER_STREAM);
        assert_eq!(config.trigger_consumer_name(), DEFAULT_TRIGGER_CONSUMER);
    }

    #[test]
    fn config_overrides_win() {
        let config = NatsConfig {
            url: "nats://localhost:4222".to_owned(),
            step_stream_name: Some("CUSTOM_STEPS".to_owned()),
            trigger_stream_name: Some("CUSTOM_TRIGGERS".to_owned()),
            trigger_consumer_name: Some("custom-worker".to_owned()),
        };

        assert_eq!(config.step_stream_name(), "CUSTOM_STEPS");
        assert_eq!(config.trigger_stream_name(), "CUSTOM_TRIGGERS");
        assert_eq!(config.trigger_consumer_name(), "custom-worker");
    }
}
