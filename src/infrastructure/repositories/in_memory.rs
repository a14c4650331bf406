use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::{
    models::{
        Campaign, CampaignStatus, CustomerProfile, DeliveryStatus, OutboundMessage,
        OutboundMessageDetails, OutboundMessageUpdate,
    },
    repositories::{CampaignRepository, CustomerRepository, OutboundMessageRepository},
};

#[derive(Default)]
struct StoreState {
    campaigns: HashMap<i64, Campaign>,
    customers: HashMap<i64, CustomerProfile>,
    messages: BTreeMap<i64, OutboundMessage>,
    next_message_id: i64,
}

/// Campaigns, customers and outbound messages behind one lock, so joins and
/// claims see a consistent view. Clones share the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_campaign(&self, campaign: Campaign) {
        let mut state = self.state.write().await;
        state.campaigns.insert(campaign.id, campaign);
    }

    pub async fn insert_customer(&self, customer: CustomerProfile) {
        let mut state = self.state.write().await;
        state.customers.insert(customer.id, customer);
    }

    pub async fn message(&self, id: i64) -> Option<OutboundMessage> {
        let state = self.state.read().await;
        state.messages.get(&id).cloned()
    }

    pub async fn messages_for_campaign(&self, campaign_id: i64) -> Vec<OutboundMessage> {
        let state = self.state.read().await;
        state
            .messages
            .values()
            .filter(|m| m.campaign_id == campaign_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CampaignRepository for InMemoryStore {
    async fn get(&self, id: i64) -> anyhow::Result<Option<Campaign>> {
        let state = self.state.read().await;
        Ok(state.campaigns.get(&id).cloned())
    }

    async fn claim_ready_campaigns(&self) -> anyhow::Result<Vec<Campaign>> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let mut claimed = Vec::new();
        for campaign in state.campaigns.values_mut() {
            let due = campaign.scheduled_at.is_some_and(|at| at <= now);
            if campaign.status == CampaignStatus::Scheduled && due {
                campaign.status = CampaignStatus::Sending;
                claimed.push(campaign.clone());
            }
        }
        claimed.sort_by_key(|c| c.id);
        Ok(claimed)
    }

    async fn mark_sending(&self, id: i64) -> anyhow::Result<Campaign> {
        let mut state = self.state.write().await;
        let campaign = state
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("campaign {id} not found"))?;
        campaign.status = CampaignStatus::Sending;
        Ok(campaign.clone())
    }

    async fn release_claim(&self, id: i64) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if let Some(campaign) = state.campaigns.get_mut(&id)
            && campaign.status == CampaignStatus::Sending
        {
            campaign.status = CampaignStatus::Scheduled;
        }
        Ok(())
    }
}

#[async_trait]
impl OutboundMessageRepository for InMemoryStore {
    async fn create_batch(
        &self,
        campaign_id: i64,
        customer_ids: &[i64],
        rendered_content: &str,
    ) -> anyhow::Result<Vec<OutboundMessage>> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let mut created = Vec::with_capacity(customer_ids.len());
        for customer_id in customer_ids {
            state.next_message_id += 1;
            let message = OutboundMessage {
                id: state.next_message_id,
                campaign_id,
                customer_id: *customer_id,
                rendered_content: rendered_content.to_string(),
                status: DeliveryStatus::Pending,
                retry_count: 0,
                last_error: None,
                provider_message_id: None,
                created_at: now,
                updated_at: now,
            };
            state.messages.insert(message.id, message.clone());
            created.push(message);
        }
        Ok(created)
    }

    async fn get_pending_for_campaign(
        &self,
        campaign_id: i64,
        after_id: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<OutboundMessage>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .range(after_id + 1..)
            .map(|(_, m)| m)
            .filter(|m| m.campaign_id == campaign_id && m.status == DeliveryStatus::Pending)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_with_details(&self, id: i64) -> anyhow::Result<Option<OutboundMessageDetails>> {
        let state = self.state.read().await;
        let Some(message) = state.messages.get(&id) else {
            return Ok(None);
        };
        let (Some(campaign), Some(customer)) = (
            state.campaigns.get(&message.campaign_id),
            state.customers.get(&message.customer_id),
        ) else {
            return Ok(None);
        };

        Ok(Some(OutboundMessageDetails {
            message: message.clone(),
            campaign_base_template: campaign.base_template.clone(),
            campaign_channel: campaign.channel.clone(),
            customer: customer.clone(),
        }))
    }

    async fn update_with_retry(
        &self,
        update: OutboundMessageUpdate,
    ) -> anyhow::Result<OutboundMessage> {
        let mut state = self.state.write().await;
        let message = state
            .messages
            .get_mut(&update.id)
            .ok_or_else(|| anyhow::anyhow!("outbound message {} not found", update.id))?;

        if update.status == DeliveryStatus::Failed {
            message.retry_count += 1;
        }
        message.status = update.status;
        if update.provider_message_id.is_some() {
            message.provider_message_id = update.provider_message_id;
        }
        message.last_error = update.last_error;
        message.updated_at = Utc::now();
        Ok(message.clone())
    }
}

#[async_trait]
impl CustomerRepository for InMemoryStore {
    async fn get_profile(&self, id: i64) -> anyhow::Result<Option<CustomerProfile>> {
        let state = self.state.read().await;
        Ok(state.customers.get(&id).cloned())
    }
}
