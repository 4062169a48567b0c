//! Platform adapters.
//!
//! Each adapter owns one authenticated bot connection. Inbound traffic is
//! normalized into [`InboundMessage`] by the adapter's gateway task and pushed
//! into an mpsc channel; [`dispatch_inbound`] drains that channel, drops bot
//! traffic and unbridged channels, and hands the rest to an
//! [`InboundHandler`]. Outbound traffic goes through
//! [`PlatformAdapter::send_message`].

pub mod discord;
pub mod reconnect;
pub mod revolt;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::bridge::models::Bridge;
use crate::bridge::ConfigStore;
use crate::error::Result;

/// Both platforms cap message bodies at this many characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// The two bridged platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Discord,
    Revolt,
}

impl Platform {
    /// The platform on the other side of every bridge.
    pub fn opposite(self) -> Self {
        match self {
            Self::Discord => Self::Revolt,
            Self::Revolt => Self::Discord,
        }
    }

    /// This platform's endpoint of `bridge`.
    pub fn channel_of(self, bridge: &Bridge) -> &str {
        match self {
            Self::Discord => &bridge.discord_channel_id,
            Self::Revolt => &bridge.revolt_channel_id,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discord => "Discord",
            Self::Revolt => "Revolt",
        })
    }
}

// ── Normalized Messages ──────────────────────────────────────────────────────

/// Sender of an inbound message, as the source platform reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// Bot accounts and webhooks. Never relayed.
    pub is_bot: bool,
}

/// A file attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAttachment {
    /// Durable, publicly fetchable URL.
    pub url: String,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

/// Platform-agnostic inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub platform: Platform,
    pub id: String,
    pub channel_ref: String,
    pub author: Author,
    pub text: String,
    pub attachments: Vec<InboundAttachment>,
}

/// Sender identity to impersonate on the target platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Outbound message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundContent {
    pub text: String,
    /// Files the target adapter should re-upload and attach natively.
    pub uploads: Vec<String>,
}

impl OutboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            uploads: Vec::new(),
        }
    }
}

/// Reference to a message the adapter delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub platform: Platform,
    pub channel_ref: String,
    pub message_id: String,
}

// ── Adapter Seams ────────────────────────────────────────────────────────────

/// Outbound half of a platform connection.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether the platform has confirmed the bot login.
    fn is_ready(&self) -> bool;

    /// Send `content` to `channel_ref`, impersonating `identity` when given.
    ///
    /// Fails with `NotReady` before login completes. Never triggers mention
    /// notifications.
    async fn send_message(
        &self,
        channel_ref: &str,
        content: &OutboundContent,
        identity: Option<&Identity>,
    ) -> Result<MessageHandle>;
}

/// Receives inbound messages that matched an enabled bridge.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_message(&self, message: InboundMessage, bridge: Bridge);
}

/// Sender half used by gateway tasks to publish normalized messages.
pub type InboundSender = mpsc::UnboundedSender<InboundMessage>;

/// Drain one platform's inbound stream, one message at a time.
///
/// Returns when the gateway side of the channel is dropped.
pub async fn dispatch_inbound<H>(
    platform: Platform,
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    store: ConfigStore,
    handler: H,
) where
    H: InboundHandler,
{
    while let Some(message) = inbound.recv().await {
        if message.author.is_bot {
            continue;
        }

        let bridge = match store.find_bridge_for_channel(platform, &message.channel_ref) {
            Some(bridge) => bridge,
            None => {
                tracing::trace!(
                    platform = %platform,
                    channel = message.channel_ref.as_str(),
                    "Message in unbridged channel"
                );
                continue;
            }
        };

        tracing::debug!(
            platform = %platform,
            message_id = message.id.as_str(),
            bridge_id = bridge.id,
            "Processing message for bridge"
        );
        handler.on_message(message, bridge).await;
    }

    tracing::info!(platform = %platform, "Inbound stream closed");
}

/// Cut `text` to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::inbound;
    use super::*;
    use crate::bridge::models::{BridgePatch, NewBridge};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CollectingHandler {
        seen: Arc<Mutex<Vec<(String, i64)>>>,
    }

    #[async_trait]
    impl InboundHandler for CollectingHandler {
        async fn on_message(&self, message: InboundMessage, bridge: Bridge) {
            self.seen.lock().push((message.id, bridge.id));
        }
    }

    fn store_with_bridge() -> (ConfigStore, Bridge) {
        let store = ConfigStore::new();
        let bridge = store.create_bridge(NewBridge {
            discord_channel_id: "d1".into(),
            revolt_channel_id: "r1".into(),
            enabled: None,
        });
        (store, bridge)
    }

    async fn run(
        platform: Platform,
        store: ConfigStore,
        messages: Vec<InboundMessage>,
    ) -> Vec<(String, i64)> {
        let handler = CollectingHandler::default();
        let (tx, rx) = mpsc::unbounded_channel();
        for message in messages {
            tx.send(message).unwrap();
        }
        drop(tx);
        dispatch_inbound(platform, rx, store, handler.clone()).await;
        let seen = handler.seen.lock().clone();
        seen
    }

    #[tokio::test]
    async fn test_bridged_message_reaches_handler() {
        let (store, bridge) = store_with_bridge();
        let seen = run(
            Platform::Discord,
            store,
            vec![inbound(Platform::Discord, "d1", "hello")],
        )
        .await;
        assert_eq!(seen, vec![("m1".to_string(), bridge.id)]);
    }

    #[tokio::test]
    async fn test_bot_messages_are_dropped() {
        let (store, _) = store_with_bridge();
        let mut message = inbound(Platform::Discord, "d1", "echo");
        message.author.is_bot = true;
        assert!(run(Platform::Discord, store, vec![message]).await.is_empty());
    }

    #[tokio::test]
    async fn test_unbridged_channel_is_dropped() {
        let (store, _) = store_with_bridge();
        let seen = run(
            Platform::Revolt,
            store,
            vec![inbound(Platform::Revolt, "elsewhere", "hi")],
        )
        .await;
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_bridge_is_dropped() {
        let (store, bridge) = store_with_bridge();
        store
            .update_bridge(
                bridge.id,
                BridgePatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        let seen = run(
            Platform::Discord,
            store,
            vec![inbound(Platform::Discord, "d1", "hi")],
        )
        .await;
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_matched_per_platform() {
        let (store, _) = store_with_bridge();
        // "r1" is the Revolt endpoint; a Discord channel with that id is unrelated.
        let seen = run(
            Platform::Discord,
            store,
            vec![inbound(Platform::Discord, "r1", "hi")],
        )
        .await;
        assert!(seen.is_empty());
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_opposite_platform() {
        assert_eq!(Platform::Discord.opposite(), Platform::Revolt);
        assert_eq!(Platform::Revolt.opposite(), Platform::Discord);
    }
}
