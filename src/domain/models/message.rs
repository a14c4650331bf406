use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::customer::CustomerProfile;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: i64,
    pub campaign_id: i64,
    pub customer_id: i64,
    pub rendered_content: String,
    pub status: DeliveryStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An outbound message joined with what the worker needs to deliver it.
#[derive(Debug, Clone)]
pub struct OutboundMessageDetails {
    pub message: OutboundMessage,
    pub campaign_base_template: String,
    pub campaign_channel: String,
    pub customer: CustomerProfile,
}

/// Post-attempt write. A `Failed` status bumps `retry_count` inside the store.
#[derive(Debug, Clone)]
pub struct OutboundMessageUpdate {
    pub id: i64,
    pub status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub last_error: Option<String>,
}

impl OutboundMessageUpdate {
    pub fn sent(id: i64, provider_message_id: String) -> Self {
        Self {
            id,
            status: DeliveryStatus::Sent,
            provider_message_id: Some(provider_message_id),
            last_error: None,
        }
    }

    pub fn failed(id: i64, error: String) -> Self {
        Self {
            id,
            status: DeliveryStatus::Failed,
            provider_message_id: None,
            last_error: Some(error),
        }
    }
}
