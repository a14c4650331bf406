use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::{
    application::services::{sender::Sender, template::render_template},
    domain::{
        events::CampaignSendEvent,
        models::{DeliveryStatus, OutboundMessageDetails, OutboundMessageUpdate},
        repositories::OutboundMessageRepository,
    },
};

/// How a delivery is settled with the broker once processing ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    Reject,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Failed attempts after which a message is given up on.
    pub max_retries: i32,
    /// Pause before a failed send is handed back to the broker.
    pub requeue_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            requeue_delay: Duration::from_secs(1),
        }
    }
}

pub struct MessageDispatchHandler {
    messages: Arc<dyn OutboundMessageRepository>,
    sender: Arc<dyn Sender>,
    config: DispatchConfig,
}

impl MessageDispatchHandler {
    pub fn new(
        messages: Arc<dyn OutboundMessageRepository>,
        sender: Arc<dyn Sender>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            messages,
            sender,
            config,
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> Disposition {
        let event: CampaignSendEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(err) => {
                error!(error = %err, "failed to decode dispatch envelope, discarding");
                return Disposition::Reject;
            }
        };
        let id = event.outbound_message_id;
        info!(outbound_message_id = id, "processing message");

        let details = match self.messages.get_with_details(id).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                warn!(outbound_message_id = id, "outbound message not found, discarding");
                return Disposition::Reject;
            }
            Err(err) => {
                error!(outbound_message_id = id, error = %err, "failed to fetch message details");
                return Disposition::Requeue;
            }
        };

        if details.message.status == DeliveryStatus::Sent {
            info!(outbound_message_id = id, "message already sent, skipping duplicate delivery");
            return Disposition::Ack;
        }
        if details.message.retry_count >= self.config.max_retries {
            warn!(
                outbound_message_id = id,
                retry_count = details.message.retry_count,
                "retry limit already reached, not sending again"
            );
            return Disposition::Ack;
        }

        let content = render_template(&details.campaign_base_template, &details.customer);
        let idempotency_key = format!("outbound-message-{id}");

        match self
            .sender
            .send_with_key(&content, &details.customer.phone, &idempotency_key)
            .await
        {
            Ok(provider_message_id) => self.handle_success(id, provider_message_id).await,
            Err(err) => self.handle_failure(&details, err).await,
        }
    }

    async fn handle_success(&self, id: i64, provider_message_id: String) -> Disposition {
        let update = OutboundMessageUpdate::sent(id, provider_message_id);
        if let Err(err) = self.messages.update_with_retry(update).await {
            // The customer already has the message; redelivery would send it twice.
            error!(
                outbound_message_id = id,
                error = %err,
                "failed to record sent status, acknowledging anyway"
            );
            return Disposition::Ack;
        }

        info!(outbound_message_id = id, "message sent successfully");
        Disposition::Ack
    }

    async fn handle_failure(
        &self,
        details: &OutboundMessageDetails,
        send_error: anyhow::Error,
    ) -> Disposition {
        let id = details.message.id;
        warn!(outbound_message_id = id, error = %send_error, "failed to send message");

        let update = OutboundMessageUpdate::failed(id, send_error.to_string());
        let updated = match self.messages.update_with_retry(update).await {
            Ok(updated) => updated,
            Err(err) => {
                error!(outbound_message_id = id, error = %err, "failed to record failed status");
                return Disposition::Requeue;
            }
        };

        // The stored count after the bump decides whether another attempt is allowed.
        if updated.retry_count < self.config.max_retries {
            info!(
                outbound_message_id = id,
                retry_count = updated.retry_count,
                "requeueing for retry"
            );
            if !self.config.requeue_delay.is_zero() {
                tokio::time::sleep(self.config.requeue_delay).await;
            }
            Disposition::Requeue
        } else {
            warn!(
                outbound_message_id = id,
                retry_count = updated.retry_count,
                "max retries reached, giving up"
            );
            Disposition::Ack
        }
    }
}
