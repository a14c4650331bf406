use async_trait::async_trait;

use crate::domain::models::{
    Campaign, CustomerProfile, OutboundMessage, OutboundMessageDetails, OutboundMessageUpdate,
};

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn get(&self, id: i64) -> anyhow::Result<Option<Campaign>>;

    /// Flips every due `scheduled` campaign to `sending` in one atomic step
    /// and returns the campaigns this caller won.
    async fn claim_ready_campaigns(&self) -> anyhow::Result<Vec<Campaign>>;

    async fn mark_sending(&self, id: i64) -> anyhow::Result<Campaign>;

    /// Hands a claimed campaign back to `scheduled` so a later claim can
    /// pick it up again. A no-op unless the campaign is `sending`.
    async fn release_claim(&self, id: i64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait OutboundMessageRepository: Send + Sync {
    async fn create_batch(
        &self,
        campaign_id: i64,
        customer_ids: &[i64],
        rendered_content: &str,
    ) -> anyhow::Result<Vec<OutboundMessage>>;

    /// Pending messages of a campaign with `id > after_id`, ordered by id.
    async fn get_pending_for_campaign(
        &self,
        campaign_id: i64,
        after_id: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<OutboundMessage>>;

    async fn get_with_details(&self, id: i64) -> anyhow::Result<Option<OutboundMessageDetails>>;

    /// Applies the update and returns the row as stored afterwards.
    async fn update_with_retry(
        &self,
        update: OutboundMessageUpdate,
    ) -> anyhow::Result<OutboundMessage>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn get_profile(&self, id: i64) -> anyhow::Result<Option<CustomerProfile>>;
}
