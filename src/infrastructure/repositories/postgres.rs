use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres};

use crate::domain::{
    models::{
        Campaign, CampaignStatus, CustomerProfile, DeliveryStatus, OutboundMessage,
        OutboundMessageDetails, OutboundMessageUpdate,
    },
    repositories::{CampaignRepository, CustomerRepository, OutboundMessageRepository},
};

pub type PgPool = Pool<Postgres>;

const CAMPAIGN_COLUMNS: &str =
    "id, name, channel, base_template, scheduled_at, status, created_at";

const MESSAGE_COLUMNS: &str = "id, campaign_id, customer_id, rendered_content, status, \
     retry_count, last_error, provider_message_id, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresCampaignRepository {
    pool: PgPool,
}

impl PostgresCampaignRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl CampaignRepository for PostgresCampaignRepository {
    async fn get(&self, id: i64) -> anyhow::Result<Option<Campaign>> {
        let record = sqlx::query_as::<_, CampaignRecord>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Campaign::try_from).transpose()
    }

    async fn claim_ready_campaigns(&self) -> anyhow::Result<Vec<Campaign>> {
        // Row locks with SKIP LOCKED make concurrent schedulers split the due
        // set instead of both flipping the same campaign.
        let rows = sqlx::query_as::<_, CampaignRecord>(&format!(
            r#"
            UPDATE campaigns
            SET status = 'sending',
                updated_at = NOW()
            WHERE id IN (
                SELECT id
                FROM campaigns
                WHERE status = 'scheduled'
                  AND scheduled_at IS NOT NULL
                  AND scheduled_at <= NOW()
                ORDER BY scheduled_at
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Campaign::try_from).collect()
    }

    async fn mark_sending(&self, id: i64) -> anyhow::Result<Campaign> {
        let record = sqlx::query_as::<_, CampaignRecord>(&format!(
            r#"
            UPDATE campaigns
            SET status = 'sending',
                updated_at = NOW()
            WHERE id = $1
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        record.try_into()
    }

    async fn release_claim(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'scheduled',
                updated_at = NOW()
            WHERE id = $1
              AND status = 'sending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresOutboundMessageRepository {
    pool: PgPool,
}

impl PostgresOutboundMessageRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl OutboundMessageRepository for PostgresOutboundMessageRepository {
    async fn create_batch(
        &self,
        campaign_id: i64,
        customer_ids: &[i64],
        rendered_content: &str,
    ) -> anyhow::Result<Vec<OutboundMessage>> {
        let rows = sqlx::query_as::<_, OutboundMessageRecord>(&format!(
            r#"
            INSERT INTO outbound_messages (campaign_id, customer_id, rendered_content, status)
            SELECT $1, customer_id, $3, 'pending'
            FROM UNNEST($2::BIGINT[]) AS customer_id
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(campaign_id)
        .bind(customer_ids)
        .bind(rendered_content)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutboundMessage::try_from).collect()
    }

    async fn get_pending_for_campaign(
        &self,
        campaign_id: i64,
        after_id: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<OutboundMessage>> {
        let rows = sqlx::query_as::<_, OutboundMessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM outbound_messages
            WHERE campaign_id = $1
              AND status = 'pending'
              AND id > $2
            ORDER BY id
            LIMIT $3
            "#
        ))
        .bind(campaign_id)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutboundMessage::try_from).collect()
    }

    async fn get_with_details(&self, id: i64) -> anyhow::Result<Option<OutboundMessageDetails>> {
        let record = sqlx::query_as::<_, OutboundMessageDetailsRecord>(
            r#"
            SELECT
                m.id,
                m.campaign_id,
                m.customer_id,
                m.rendered_content,
                m.status,
                m.retry_count,
                m.last_error,
                m.provider_message_id,
                m.created_at,
                m.updated_at,
                c.base_template AS campaign_base_template,
                c.channel AS campaign_channel,
                cu.firstname AS customer_firstname,
                cu.lastname AS customer_lastname,
                cu.phone AS customer_phone,
                cu.location AS customer_location,
                cu.prefered_product AS customer_prefered_product
            FROM outbound_messages m
            JOIN campaigns c ON c.id = m.campaign_id
            JOIN customers cu ON cu.id = m.customer_id
            WHERE m.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(OutboundMessageDetails::try_from).transpose()
    }

    async fn update_with_retry(
        &self,
        update: OutboundMessageUpdate,
    ) -> anyhow::Result<OutboundMessage> {
        let record = sqlx::query_as::<_, OutboundMessageRecord>(&format!(
            r#"
            UPDATE outbound_messages
            SET status = $2,
                provider_message_id = COALESCE($3, provider_message_id),
                last_error = $4,
                retry_count = CASE WHEN $2 = 'failed' THEN retry_count + 1 ELSE retry_count END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(update.id)
        .bind(update.status.as_str())
        .bind(&update.provider_message_id)
        .bind(&update.last_error)
        .fetch_one(&self.pool)
        .await?;
        record.try_into()
    }
}

#[derive(Clone)]
pub struct PostgresCustomerRepository {
    pool: PgPool,
}

impl PostgresCustomerRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl CustomerRepository for PostgresCustomerRepository {
    async fn get_profile(&self, id: i64) -> anyhow::Result<Option<CustomerProfile>> {
        let record = sqlx::query_as::<_, CustomerRecord>(
            r#"
            SELECT id, firstname, lastname, phone, location, prefered_product
            FROM customers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(CustomerProfile::from))
    }
}

#[derive(FromRow)]
struct CampaignRecord {
    id: i64,
    name: String,
    channel: String,
    base_template: String,
    scheduled_at: Option<DateTime<Utc>>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<CampaignRecord> for Campaign {
    type Error = anyhow::Error;

    fn try_from(value: CampaignRecord) -> Result<Self, Self::Error> {
        let status = CampaignStatus::from_str(&value.status)
            .ok_or_else(|| anyhow::anyhow!("unknown campaign status {}", value.status))?;
        Ok(Self {
            id: value.id,
            name: value.name,
            channel: value.channel,
            base_template: value.base_template,
            scheduled_at: value.scheduled_at,
            status,
            created_at: value.created_at,
        })
    }
}

#[derive(FromRow)]
struct OutboundMessageRecord {
    id: i64,
    campaign_id: i64,
    customer_id: i64,
    rendered_content: String,
    status: String,
    retry_count: i32,
    last_error: Option<String>,
    provider_message_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OutboundMessageRecord> for OutboundMessage {
    type Error = anyhow::Error;

    fn try_from(value: OutboundMessageRecord) -> Result<Self, Self::Error> {
        let status = DeliveryStatus::from_str(&value.status)
            .ok_or_else(|| anyhow::anyhow!("unknown delivery status {}", value.status))?;
        Ok(Self {
            id: value.id,
            campaign_id: value.campaign_id,
            customer_id: value.customer_id,
            rendered_content: value.rendered_content,
            status,
            retry_count: value.retry_count,
            last_error: value.last_error,
            provider_message_id: value.provider_message_id,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OutboundMessageDetailsRecord {
    #[sqlx(flatten)]
    message: OutboundMessageRecord,
    campaign_base_template: String,
    campaign_channel: String,
    customer_firstname: String,
    customer_lastname: String,
    customer_phone: String,
    customer_location: Option<String>,
    customer_prefered_product: Option<String>,
}

impl TryFrom<OutboundMessageDetailsRecord> for OutboundMessageDetails {
    type Error = anyhow::Error;

    fn try_from(value: OutboundMessageDetailsRecord) -> Result<Self, Self::Error> {
        let message = OutboundMessage::try_from(value.message)?;
        let customer = CustomerProfile {
            id: message.customer_id,
            first_name: value.customer_firstname,
            last_name: value.customer_lastname,
            phone: value.customer_phone,
            location: value.customer_location,
            prefered_product: value.customer_prefered_product,
        };
        Ok(Self {
            message,
            campaign_base_template: value.campaign_base_template,
            campaign_channel: value.campaign_channel,
            customer,
        })
    }
}

#[derive(FromRow)]
struct CustomerRecord {
    id: i64,
    firstname: String,
    lastname: String,
    phone: String,
    location: Option<String>,
    prefered_product: Option<String>,
}

impl From<CustomerRecord> for CustomerProfile {
    fn from(value: CustomerRecord) -> Self {
        Self {
            id: value.id,
            first_name: value.firstname,
            last_name: value.lastname,
            phone: value.phone,
            location: value.location,
            prefered_product: value.prefered_product,
        }
    }
}
