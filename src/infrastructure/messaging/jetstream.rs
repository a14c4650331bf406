use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_nats::connection::State;
use async_nats::jetstream::{
    self, AckKind,
    consumer::{AckPolicy, PullConsumer, pull},
    stream::{RetentionPolicy, StorageType},
};
use async_trait::async_trait;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::{
    application::services::event_bus::{Delivery, DeliveryStream, MessageBus},
    domain::events::CampaignSendEvent,
};

#[derive(Debug, Clone)]
pub struct JetstreamConfig {
    pub url: String,
    pub stream: String,
    pub subject: String,
    pub durable: String,
    pub ack_wait_seconds: u64,
    /// `-1` keeps redelivering; the store's retry ceiling bounds send failures.
    pub max_deliver: i64,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
}

impl Default for JetstreamConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "CAMPAIGN_SENDS".to_string(),
            subject: "campaign.sends".to_string(),
            durable: "campaign-dispatch-worker".to_string(),
            ack_wait_seconds: 30,
            max_deliver: -1,
            connect_attempts: 10,
            connect_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Durable work queue on JetStream. One handle serves both the publishing
/// side and the consuming side of a process.
pub struct JetstreamBroker {
    client: async_nats::Client,
    context: jetstream::Context,
    consumer: PullConsumer,
    subject: String,
    closed: AtomicBool,
}

impl JetstreamBroker {
    pub async fn connect(config: &JetstreamConfig) -> anyhow::Result<Arc<Self>> {
        let client = connect_with_retry(config).await?;
        let context = jetstream::new(client.clone());

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream.clone(),
                subjects: vec![config.subject.clone()],
                retention: RetentionPolicy::WorkQueue,
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .with_context(|| format!("failed to declare stream {}", config.stream))?;

        let consumer = stream
            .get_or_create_consumer(
                &config.durable,
                pull::Config {
                    durable_name: Some(config.durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(config.ack_wait_seconds),
                    max_deliver: config.max_deliver,
                    filter_subject: config.subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("failed to declare consumer {}", config.durable))?;

        info!(
            stream = %config.stream,
            consumer = %config.durable,
            "connected to broker and declared dispatch queue"
        );

        Ok(Arc::new(Self {
            client,
            context,
            consumer,
            subject: config.subject.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    /// Deliveries with explicit acknowledgement. At most one message is
    /// pulled per request so the worker never sits on a backlog.
    pub async fn consume(&self) -> anyhow::Result<DeliveryStream> {
        let messages = self
            .consumer
            .stream()
            .max_messages_per_batch(1)
            .messages()
            .await
            .context("failed to register a consumer")?;

        let deliveries = messages.map(|item| match item {
            Ok(message) => Ok(Box::new(JetstreamDelivery { message }) as Box<dyn Delivery>),
            Err(err) => Err(anyhow::anyhow!("jetstream delivery error: {err}")),
        });
        Ok(Box::pin(deliveries))
    }

    pub fn ping(&self) -> anyhow::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("broker handle is closed");
        }
        match self.client.connection_state() {
            State::Connected => Ok(()),
            state => anyhow::bail!("broker connection is not open: {state:?}"),
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.client.flush().await {
            error!(error = %err, "failed to flush pending publishes");
        }
        if let Err(err) = self.client.drain().await {
            error!(error = %err, "failed to close broker connection");
            return;
        }
        info!("closed broker connection");
    }
}

#[async_trait]
impl MessageBus for JetstreamBroker {
    async fn publish(&self, outbound_message_id: i64) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&CampaignSendEvent::new(outbound_message_id))
            .context("failed to encode dispatch envelope")?;

        // The second await waits for the stream to persist the message.
        let ack = self
            .context
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| anyhow::anyhow!("failed to publish message: {e}"))?
            .await
            .map_err(|e| anyhow::anyhow!("failed to publish message: {e}"))?;

        debug!(
            outbound_message_id,
            sequence = ack.sequence,
            "published message to queue"
        );
        Ok(())
    }
}

struct JetstreamDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for JetstreamDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(&self) -> anyhow::Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow::anyhow!("failed to ack message: {e}"))
    }

    async fn nack_requeue(&self) -> anyhow::Result<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| anyhow::anyhow!("failed to nack message: {e}"))
    }

    async fn reject(&self) -> anyhow::Result<()> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| anyhow::anyhow!("failed to reject message: {e}"))
    }
}

async fn connect_with_retry(config: &JetstreamConfig) -> anyhow::Result<async_nats::Client> {
    let attempts = config.connect_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match async_nats::connect(&config.url).await {
            Ok(client) => return Ok(client),
            Err(err) => {
                warn!(
                    error = %err,
                    attempt,
                    attempts,
                    "failed to connect to broker"
                );
                last_error = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(config.connect_retry_delay).await;
                }
            }
        }
    }

    error!(attempts, "failed to connect to broker after retries");
    match last_error {
        Some(err) => Err(anyhow::Error::new(err).context("failed to connect to broker")),
        None => anyhow::bail!("failed to connect to broker"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let config = JetstreamConfig {
            url: "nats://127.0.0.1:1".to_string(),
            connect_attempts: 2,
            connect_retry_delay: Duration::from_millis(10),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let result = JetstreamBroker::connect(&config).await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
