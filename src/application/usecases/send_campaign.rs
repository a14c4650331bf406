use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::{
    application::services::event_bus::MessageBus,
    domain::{
        errors::DomainError,
        models::CampaignStatus,
        repositories::{CampaignRepository, OutboundMessageRepository},
    },
};

pub struct SendCampaignUseCase {
    campaigns: Arc<dyn CampaignRepository>,
    messages: Arc<dyn OutboundMessageRepository>,
    bus: Arc<dyn MessageBus>,
}

pub struct SendCampaignRequest {
    pub campaign_id: i64,
    pub customer_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendCampaignResponse {
    pub campaign_id: i64,
    pub messages_queued: usize,
    pub status: CampaignStatus,
}

impl SendCampaignUseCase {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        messages: Arc<dyn OutboundMessageRepository>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            campaigns,
            messages,
            bus,
        }
    }

    /// Creates one pending message per customer. Campaigns that are due go
    /// straight to the queue; future ones are left for the scheduler.
    pub async fn execute(
        &self,
        request: SendCampaignRequest,
    ) -> Result<SendCampaignResponse, DomainError> {
        if request.customer_ids.is_empty() {
            return Err(DomainError::Validation(
                "customer_ids cannot be empty".to_string(),
            ));
        }

        let campaign = self
            .campaigns
            .get(request.campaign_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", request.campaign_id)))?;

        if !campaign.status.accepts_send() {
            return Err(DomainError::Validation(
                "campaign must be in draft or scheduled status".to_string(),
            ));
        }

        let messages = self
            .messages
            .create_batch(campaign.id, &request.customer_ids, &campaign.base_template)
            .await?;

        if !campaign.is_due(Utc::now()) {
            info!(
                campaign_id = campaign.id,
                count = messages.len(),
                "campaign scheduled for later, messages left pending"
            );
            return Ok(SendCampaignResponse {
                campaign_id: campaign.id,
                messages_queued: messages.len(),
                status: campaign.status,
            });
        }

        for message in &messages {
            self.bus.publish(message.id).await.map_err(|err| {
                DomainError::Other(err.context("failed to publish messages to queue"))
            })?;
        }

        let updated = self.campaigns.mark_sending(campaign.id).await?;
        info!(
            campaign_id = updated.id,
            count = messages.len(),
            "campaign messages queued"
        );

        Ok(SendCampaignResponse {
            campaign_id: updated.id,
            messages_queued: messages.len(),
            status: updated.status,
        })
    }
}
