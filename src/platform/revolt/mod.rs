//! Revolt adapter.
//!
//! Revolt impersonation needs no extra resources: every message carries an
//! optional `masquerade` with the name and avatar to display.

pub mod api;
pub mod gateway;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;

use crate::bridge::models::LogLevel;
use crate::bridge::ConfigStore;
use crate::error::{RelayError, Result};
use crate::platform::{
    truncate_chars, Author, Identity, InboundAttachment, InboundMessage, MessageHandle,
    OutboundContent, Platform, PlatformAdapter, MAX_CONTENT_CHARS,
};

pub use api::{RevoltApi, RevoltHttp};
use api::{MasqueradePayload, RevoltChannel, RevoltMessage, RevoltUser, SendMessagePayload};

/// Revolt rejects masquerade names longer than this.
pub const MAX_MASQUERADE_NAME_CHARS: usize = 32;

const SENDABLE_CHANNEL_TYPES: [&str; 4] = ["TextChannel", "Group", "DirectMessage", "SavedMessages"];

const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Login state and user cache shared between the adapter and its gateway.
#[derive(Debug, Default)]
pub struct RevoltSession {
    ready: AtomicBool,
    users: DashMap<String, RevoltUser>,
}

impl RevoltSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn cache_user(&self, user: RevoltUser) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn cached_user(&self, id: &str) -> Option<RevoltUser> {
        self.users.get(id).map(|u| u.clone())
    }
}

pub struct RevoltAdapter {
    api: Arc<dyn RevoltApi>,
    session: Arc<RevoltSession>,
    store: ConfigStore,
}

impl RevoltAdapter {
    pub fn new(api: Arc<dyn RevoltApi>, session: Arc<RevoltSession>, store: ConfigStore) -> Self {
        Self {
            api,
            session,
            store,
        }
    }

    async fn upload_all(&self, urls: &[String]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(urls.len());
        for url in urls {
            let id = self.api.upload_attachment(url).await?;
            self.store.log(
                LogLevel::Debug,
                "Uploaded attachment to Autumn",
                Some(json!({ "url": url, "fileId": id })),
            );
            ids.push(id);
        }
        Ok(ids)
    }
}

#[async_trait]
impl PlatformAdapter for RevoltAdapter {
    fn platform(&self) -> Platform {
        Platform::Revolt
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
                platform: Platform::Revolt,
            });
        }

        let channel = self.api.get_channel(channel_ref).await?;
        ensure_sendable(&channel)?;

        let attachments = self.upload_all(&content.uploads).await?;
        let payload = SendMessagePayload {
            content: suppress_mentions(truncate_chars(&content.text, MAX_CONTENT_CHARS)),
            masquerade: identity.map(|identity| MasqueradePayload {
                name: truncate_chars(&identity.display_name, MAX_MASQUERADE_NAME_CHARS)
                    .to_string(),
                avatar: identity.avatar_url.clone(),
            }),
            attachments,
        };

        let sent = self.api.send_message(channel_ref, &payload).await?;
        self.store.log(
            LogLevel::Debug,
            "Successfully sent Revolt message",
            Some(json!({
                "messageId": sent.id,
                "channelId": channel_ref,
                "masquerade": payload.masquerade.as_ref().map(|m| &m.name),
            })),
        );

        Ok(MessageHandle {
            platform: Platform::Revolt,
            channel_ref: sent.channel,
            message_id: sent.id,
        })
    }
}

fn ensure_sendable(channel: &RevoltChannel) -> Result<()> {
    if SENDABLE_CHANNEL_TYPES.contains(&channel.channel_type.as_str()) {
        Ok(())
    } else {
        Err(RelayError::InvalidChannel {
            channel: channel.id.clone(),
            reason: format!("{} cannot receive messages", channel.channel_type),
        })
    }
}

/// Break user (`<@id>`), role (`<%id>`) and mass (`@everyone`, `@online`)
/// mentions with a zero-width space so Revolt renders them as plain text.
pub fn suppress_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(['<', '@']) {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        let marker_len = if tail.starts_with("<@") || tail.starts_with("<%") {
            2
        } else if tail.starts_with("@everyone") || tail.starts_with("@online") {
            1
        } else {
            out.push_str(&tail[..1]);
            rest = &tail[1..];
            continue;
        };
        out.push_str(&tail[..marker_len]);
        out.push(ZERO_WIDTH_SPACE);
        rest = &tail[marker_len..];
    }
    out.push_str(rest);
    out
}

// ── Inbound Normalization ────────────────────────────────────────────────────

/// Build an [`InboundMessage`] from a `Message` event and its resolved author.
pub fn normalize_message(message: RevoltMessage, author: &RevoltUser, autumn_url: &str) -> InboundMessage {
    let autumn_url = autumn_url.trim_end_matches('/');
    let attachments = message
        .attachments
        .into_iter()
        .map(|file| InboundAttachment {
            url: format!("{autumn_url}/attachments/{}", file.id),
            content_type: file.content_type,
            filename: file.filename,
        })
        .collect();

    InboundMessage {
        platform: Platform::Revolt,
        id: message.id,
        channel_ref: message.channel,
        author: Author {
            id: author.id.clone(),
            display_name: author.username.clone(),
            avatar_url: author
                .avatar
                .as_ref()
                .map(|file| format!("{autumn_url}/avatars/{}", file.id)),
            is_bot: author.is_bot(),
        },
        text: message.content.unwrap_or_default(),
        attachments,
    }
}
