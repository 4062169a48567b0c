//! Discord REST surface used by the adapter.
//!
//! The adapter talks to Discord only through [`DiscordApi`], so tests can
//! substitute an in-memory fake for [`DiscordHttp`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::platform::Platform;

/// Public Discord REST base.
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

// ── Wire Types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordChannel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordWebhook {
    pub id: String,
    /// Only present on incoming webhooks the caller can execute.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Creator of the webhook.
    #[serde(default)]
    pub user: Option<DiscordUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordAttachment {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Option<DiscordUser>,
    /// Set when the message was posted through a webhook.
    #[serde(default)]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<DiscordAttachment>,
}

/// `allowed_mentions` object. An empty `parse` list disables every ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<String>,
}

impl AllowedMentions {
    pub fn none() -> Self {
        Self { parse: Vec::new() }
    }
}

/// Body for executing a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub content: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub allowed_mentions: AllowedMentions,
}

/// Body for a plain bot message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePayload {
    pub content: String,
    pub allowed_mentions: AllowedMentions,
}

// ── Trait ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait DiscordApi: Send + Sync {
    /// The bot's own user.
    async fn current_user(&self) -> Result<DiscordUser>;

    async fn get_channel(&self, channel_id: &str) -> Result<DiscordChannel>;

    async fn channel_webhooks(&self, channel_id: &str) -> Result<Vec<DiscordWebhook>>;

    async fn create_webhook(&self, channel_id: &str, name: &str) -> Result<DiscordWebhook>;

    async fn execute_webhook(
        &self,
        webhook: &DiscordWebhook,
        payload: &WebhookPayload,
    ) -> Result<DiscordMessage>;

    async fn create_message(
        &self,
        channel_id: &str,
        payload: &MessagePayload,
    ) -> Result<DiscordMessage>;
}

// ── HTTP Implementation ──────────────────────────────────────────────────────

/// [`DiscordApi`] over Discord's REST API.
#[derive(Clone)]
pub struct DiscordHttp {
    client: Client,
    base_url: String,
    token: String,
}

impl DiscordHttp {
    pub fn new(client: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn bot_auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", self.bot_auth())
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RelayError::Api {
            platform: Platform::Discord,
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl DiscordApi for DiscordHttp {
    async fn current_user(&self) -> Result<DiscordUser> {
        let request = self.authed(self.client.get(format!("{}/users/@me", self.base_url)));
        self.send(request).await
    }

    async fn get_channel(&self, channel_id: &str) -> Result<DiscordChannel> {
        let request = self.authed(
            self.client
                .get(format!("{}/channels/{}", self.base_url, channel_id)),
        );
        match self.send(request).await {
            Err(RelayError::Api { status, .. })
                if status == StatusCode::FORBIDDEN.as_u16()
                    || status == StatusCode::NOT_FOUND.as_u16() =>
            {
                Err(RelayError::InvalidChannel {
                    channel: channel_id.to_string(),
                    reason: "channel not found or missing permissions".into(),
                })
            }
            other => other,
        }
    }

    async fn channel_webhooks(&self, channel_id: &str) -> Result<Vec<DiscordWebhook>> {
        let request = self.authed(
            self.client
                .get(format!("{}/channels/{}/webhooks", self.base_url, channel_id)),
        );
        self.send(request).await
    }

    async fn create_webhook(&self, channel_id: &str, name: &str) -> Result<DiscordWebhook> {
        let request = self.authed(
            self.client
                .post(format!("{}/channels/{}/webhooks", self.base_url, channel_id))
                .json(&serde_json::json!({ "name": name })),
        );
        self.send(request).await
    }

    async fn execute_webhook(
        &self,
        webhook: &DiscordWebhook,
        payload: &WebhookPayload,
    ) -> Result<DiscordMessage> {
        let token = webhook.token.as_deref().ok_or_else(|| RelayError::InvalidChannel {
            channel: webhook.channel_id.clone().unwrap_or_default(),
            reason: format!("webhook {} has no token", webhook.id),
        })?;
        // Webhook execution is authorized by the token in the path.
        let request = self
            .client
            .post(format!("{}/webhooks/{}/{}", self.base_url, webhook.id, token))
            .query(&[("wait", "true")])
            .json(payload);
        self.send(request).await
    }

    async fn create_message(
        &self,
        channel_id: &str,
        payload: &MessagePayload,
    ) -> Result<DiscordMessage> {
        let request = self.authed(
            self.client
                .post(format!("{}/channels/{}/messages", self.base_url, channel_id))
                .json(payload),
        );
        self.send(request).await
    }
}
