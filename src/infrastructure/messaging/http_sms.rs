use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::application::services::sender::Sender;

#[derive(Debug, Clone)]
pub struct HttpSmsConfig {
    pub endpoint: String,
    pub api_token: String,
    pub timeout: Duration,
}

/// Sends through an HTTP SMS/WhatsApp gateway that accepts
/// `{to, body, idempotency_key}` and answers with `{message_id}`.
pub struct HttpSmsSender {
    http: Client,
    endpoint: String,
    api_token: String,
}

impl HttpSmsSender {
    pub fn new(config: HttpSmsConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("campaign-dispatch/http-sms")
            .timeout(config.timeout)
            .build()
            .context("failed to build sms provider client")?;
        Ok(Self {
            http,
            endpoint: config.endpoint,
            api_token: config.api_token,
        })
    }
}

#[async_trait]
impl Sender for HttpSmsSender {
    async fn send(&self, content: &str, destination: &str) -> anyhow::Result<String> {
        self.send_with_key(content, destination, "").await
    }

    async fn send_with_key(
        &self,
        content: &str,
        destination: &str,
        idempotency_key: &str,
    ) -> anyhow::Result<String> {
        let request = SendRequest {
            to: destination,
            body: content,
            idempotency_key: (!idempotency_key.is_empty()).then_some(idempotency_key),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("sms provider request to {destination} failed"))?;

        let status = response.status();
        let reply: ProviderReply = response.json().await.unwrap_or_default();
        interpret_reply(status, reply)
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderReply {
    message_id: Option<String>,
    error: Option<String>,
}

fn interpret_reply(status: StatusCode, reply: ProviderReply) -> anyhow::Result<String> {
    if !status.is_success() {
        anyhow::bail!(
            "sms provider returned {}: {}",
            status.as_u16(),
            reply.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    match reply.message_id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => anyhow::bail!("sms provider response is missing message_id"),
    }
}
