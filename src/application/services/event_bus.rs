use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// Publish side of the dispatch queue.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, outbound_message_id: i64) -> anyhow::Result<()>;
}

/// A single delivery pulled from the dispatch queue. Every delivery must be
/// settled exactly once through one of the three methods.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    async fn ack(&self) -> anyhow::Result<()>;

    /// Negative acknowledgement; the broker redelivers the message later.
    async fn nack_requeue(&self) -> anyhow::Result<()>;

    /// Drops the message for good.
    async fn reject(&self) -> anyhow::Result<()>;
}

pub type DeliveryStream =
    Pin<Box<dyn Stream<Item = anyhow::Result<Box<dyn Delivery>>> + Send>>;
