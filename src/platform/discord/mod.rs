//! Discord adapter.
//!
//! Outbound messages with an identity go through a per-channel webhook owned
//! by the bot so the message shows the impersonated name and avatar. Without
//! an identity, or when no webhook can be obtained, the bot posts directly.

pub mod api;
pub mod gateway;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::Mutex;

use crate::bridge::models::LogLevel;
use crate::bridge::ConfigStore;
use crate::error::{RelayError, Result};
use crate::platform::{
    truncate_chars, Author, Identity, InboundAttachment, InboundMessage, MessageHandle,
    OutboundContent, Platform, PlatformAdapter, MAX_CONTENT_CHARS,
};

pub use api::{DiscordApi, DiscordHttp};
use api::{AllowedMentions, DiscordChannel, DiscordMessage, DiscordUser, DiscordWebhook};
use api::{MessagePayload, WebhookPayload};

/// Name given to webhooks the bot creates.
pub const WEBHOOK_NAME: &str = "Bridge Bot";

/// Discord rejects webhook usernames longer than this.
pub const MAX_WEBHOOK_USERNAME_CHARS: usize = 80;

const CDN_BASE: &str = "https://cdn.discordapp.com";

/// Channel types the bot can post into: guild text and announcement.
const SENDABLE_CHANNEL_TYPES: [u8; 2] = [0, 5];

/// Login state shared between the adapter and its gateway task.
#[derive(Debug, Default)]
pub struct DiscordSession {
    ready: AtomicBool,
    bot_user_id: RwLock<Option<String>>,
}

impl DiscordSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn bot_user_id(&self) -> Option<String> {
        self.bot_user_id.read().clone()
    }

    pub fn set_bot_user_id(&self, id: impl Into<String>) {
        *self.bot_user_id.write() = Some(id.into());
    }
}

pub struct DiscordAdapter {
    api: Arc<dyn DiscordApi>,
    session: Arc<DiscordSession>,
    /// Channel id → webhook. Held across resolution so concurrent sends to
    /// one channel create at most one webhook.
    webhooks: Mutex<HashMap<String, DiscordWebhook>>,
    store: ConfigStore,
}

impl DiscordAdapter {
    pub fn new(api: Arc<dyn DiscordApi>, session: Arc<DiscordSession>, store: ConfigStore) -> Self {
        Self {
            api,
            session,
            webhooks: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Cached webhook for `channel_id`, resolving one on a miss.
    ///
    /// Failures are logged and yield `None`; the caller falls back to the bot.
    async fn webhook_for(&self, channel_id: &str) -> Option<DiscordWebhook> {
        let mut cache = self.webhooks.lock().await;
        if let Some(webhook) = cache.get(channel_id) {
            return Some(webhook.clone());
        }

        match self.resolve_webhook(channel_id).await {
            Ok(webhook) => {
                cache.insert(channel_id.to_string(), webhook.clone());
                Some(webhook)
            }
            Err(e) => {
                self.store.log(
                    LogLevel::Warn,
                    "Failed to get webhook",
                    Some(json!({ "channelId": channel_id, "error": e.to_string() })),
                );
                None
            }
        }
    }

    async fn resolve_webhook(&self, channel_id: &str) -> Result<DiscordWebhook> {
        let channel = self.api.get_channel(channel_id).await?;
        ensure_sendable(&channel)?;

        let bot_id = self.bot_user_id().await?;
        let existing = self
            .api
            .channel_webhooks(channel_id)
            .await?
            .into_iter()
            .find(|hook| owned_by(hook, &bot_id));
        if let Some(webhook) = existing {
            self.store.log(
                LogLevel::Debug,
                "Reusing existing Discord webhook",
                Some(json!({ "channelId": channel_id, "webhookId": webhook.id })),
            );
            return Ok(webhook);
        }

        let webhook = self.api.create_webhook(channel_id, WEBHOOK_NAME).await?;
        self.store.log(
            LogLevel::Info,
            "Created Discord webhook",
            Some(json!({ "channelId": channel_id, "webhookId": webhook.id })),
        );
        Ok(webhook)
    }

    async fn bot_user_id(&self) -> Result<String> {
        if let Some(id) = self.session.bot_user_id() {
            return Ok(id);
        }
        let user = self.api.current_user().await?;
        self.session.set_bot_user_id(user.id.clone());
        Ok(user.id)
    }

    async fn send_as_bot(&self, channel_id: &str, text: String) -> Result<DiscordMessage> {
        let channel = self.api.get_channel(channel_id).await?;
        ensure_sendable(&channel)?;
        let payload = MessagePayload {
            content: text,
            allowed_mentions: AllowedMentions::none(),
        };
        self.api.create_message(channel_id, &payload).await
    }
}

#[async_trait]
impl PlatformAdapter for DiscordAdapter {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    async fn send_message(
        &self,
        channel_ref: &str,
        content: &OutboundContent,
        identity: Option<&Identity>,
    ) -> Result<MessageHandle> {
        if !self.is_ready() {
            return Err(RelayError::NotReady {
                platform: Platform::Discord,
            });
        }

        let text = render_text(content);

        let webhook = match identity {
            Some(_) => self.webhook_for(channel_ref).await,
            None => None,
        };

        let message = match (webhook, identity) {
            (Some(webhook), Some(identity)) => {
                let payload = WebhookPayload {
                    content: text,
                    username: truncate_chars(&identity.display_name, MAX_WEBHOOK_USERNAME_CHARS)
                        .to_string(),
                    avatar_url: identity.avatar_url.clone(),
                    allowed_mentions: AllowedMentions::none(),
                };
                let message = self.api.execute_webhook(&webhook, &payload).await?;
                self.store.log(
                    LogLevel::Debug,
                    "Successfully sent Discord message via webhook",
                    Some(json!({
                        "messageId": message.id,
                        "webhookId": webhook.id,
                        "username": payload.username,
                        "channelId": channel_ref,
                    })),
                );
                message
            }
            _ => {
                let message = self.send_as_bot(channel_ref, text).await?;
                self.store.log(
                    LogLevel::Debug,
                    "Successfully sent Discord message via bot",
                    Some(json!({ "messageId": message.id, "channelId": channel_ref })),
                );
                message
            }
        };

        Ok(MessageHandle {
            platform: Platform::Discord,
            channel_ref: message.channel_id,
            message_id: message.id,
        })
    }
}

fn ensure_sendable(channel: &DiscordChannel) -> Result<()> {
    if SENDABLE_CHANNEL_TYPES.contains(&channel.kind) {
        Ok(())
    } else {
        Err(RelayError::InvalidChannel {
            channel: channel.id.clone(),
            reason: format!("channel type {} is not a text channel", channel.kind),
        })
    }
}

fn owned_by(webhook: &DiscordWebhook, bot_id: &str) -> bool {
    webhook.token.is_some()
        && webhook
            .user
            .as_ref()
            .map(|user| user.id == bot_id)
            .unwrap_or(false)
}

/// Text plus one link per upload, capped at the Discord body limit.
///
/// Discord has no upload step in this relay, so uploads degrade to links.
fn render_text(content: &OutboundContent) -> String {
    let mut text = content.text.clone();
    for url in &content.uploads {
        text.push('\n');
        text.push_str(url);
    }
    truncate_chars(&text, MAX_CONTENT_CHARS).to_string()
}

// ── Inbound Normalization ────────────────────────────────────────────────────

/// CDN avatar for `user`; the default embed avatar when they have none.
pub fn avatar_url(user: &DiscordUser) -> String {
    match &user.avatar {
        Some(hash) => {
            let ext = if hash.starts_with("a_") { "gif" } else { "png" };
            format!("{CDN_BASE}/avatars/{}/{}.{}", user.id, hash, ext)
        }
        None => {
            let index = match user.discriminator.as_deref() {
                Some(d) if d != "0" => d.parse::<u64>().unwrap_or(0) % 5,
                _ => user.id.parse::<u64>().map(|id| (id >> 22) % 6).unwrap_or(0),
            };
            format!("{CDN_BASE}/embed/avatars/{index}.png")
        }
    }
}

/// Convert a `MESSAGE_CREATE` payload. Messages without an author are ignored.
pub fn normalize_message(message: DiscordMessage) -> Option<InboundMessage> {
    let user = message.author?;
    let author = Author {
        avatar_url: Some(avatar_url(&user)),
        is_bot: user.bot || message.webhook_id.is_some(),
        id: user.id,
        display_name: user.username,
    };
    let attachments = message
        .attachments
        .into_iter()
        .map(|a| InboundAttachment {
            url: a.url,
            content_type: a.content_type,
            filename: Some(a.filename),
        })
        .collect();

    Some(InboundMessage {
        platform: Platform::Discord,
        id: message.id,
        channel_ref: message.channel_id,
        author,
        text: message.content,
        attachments,
    })
}
