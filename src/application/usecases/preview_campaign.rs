use std::sync::Arc;

use serde::Serialize;

use crate::{
    application::services::template::render_template,
    domain::{
        errors::DomainError,
        models::CustomerProfile,
        repositories::{CampaignRepository, CustomerRepository},
    },
};

pub struct PreviewCampaignUseCase {
    campaigns: Arc<dyn CampaignRepository>,
    customers: Arc<dyn CustomerRepository>,
}

pub struct PreviewCampaignRequest {
    pub campaign_id: i64,
    pub customer_id: i64,
    pub override_template: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewCampaignResponse {
    pub rendered_message: String,
    pub used_template: String,
    pub customer: CustomerProfile,
}

impl PreviewCampaignUseCase {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        customers: Arc<dyn CustomerRepository>,
    ) -> Self {
        Self {
            campaigns,
            customers,
        }
    }

    pub async fn execute(
        &self,
        request: PreviewCampaignRequest,
    ) -> Result<PreviewCampaignResponse, DomainError> {
        let campaign = self
            .campaigns
            .get(request.campaign_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", request.campaign_id)))?;

        let customer = self
            .customers
            .get_profile(request.customer_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("customer {}", request.customer_id)))?;

        let used_template = request
            .override_template
            .filter(|template| !template.is_empty())
            .unwrap_or(campaign.base_template);

        Ok(PreviewCampaignResponse {
            rendered_message: render_template(&used_template, &customer),
            used_template,
            customer,
        })
    }
}
