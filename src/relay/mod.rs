//! Relay coordinator.
//!
//! Takes a bridged inbound message through
//! `Resolving → Transforming → Dispatching` and records the outcome. Every
//! failure is logged once and swallowed; delivery is at-most-once.
//! Resolution reads only the in-memory store and cannot fail, so a failed
//! relay always stops in one of the later two stages.

pub mod content;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::bridge::models::{Bridge, LogLevel, Masquerade};
use crate::bridge::ConfigStore;
use crate::error::RelayError;
use crate::platform::{Author, Identity, InboundHandler, InboundMessage, Platform, PlatformAdapter};

/// Name used when neither an override nor the platform supplies one.
pub const UNKNOWN_USER: &str = "Unknown User";

#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOptions {
    /// Upload Discord images to Autumn instead of linking them.
    pub rehost_images: bool,
}

/// Where a failed relay attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    Transforming,
    Dispatching,
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transforming => "transforming",
            Self::Dispatching => "dispatching",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered {
        message_id: String,
        attachment_count: usize,
    },
    Failed {
        stage: RelayStage,
        error: String,
    },
    Skipped,
}

/// Identity to present on the target platform.
///
/// An enabled override's name always wins. Its avatar wins only when set
/// and non-blank; otherwise the sender's native avatar is kept.
pub fn resolve_identity(masquerade: Option<&Masquerade>, author: &Author) -> Identity {
    let native_name = if author.display_name.is_empty() {
        UNKNOWN_USER.to_string()
    } else {
        author.display_name.clone()
    };

    match masquerade {
        Some(masquerade) if masquerade.enabled => Identity {
            display_name: if masquerade.username.is_empty() {
                native_name
            } else {
                masquerade.username.clone()
            },
            avatar_url: match masquerade.avatar.as_deref().map(str::trim) {
                Some(avatar) if !avatar.is_empty() => Some(avatar.to_string()),
                _ => author.avatar_url.clone(),
            },
        },
        _ => Identity {
            display_name: native_name,
            avatar_url: author.avatar_url.clone(),
        },
    }
}

/// Wires inbound messages from one platform to the other.
#[derive(Clone)]
pub struct Relay {
    store: ConfigStore,
    discord: Arc<dyn PlatformAdapter>,
    revolt: Arc<dyn PlatformAdapter>,
    options: RelayOptions,
}

impl Relay {
    pub fn new(
        store: ConfigStore,
        discord: Arc<dyn PlatformAdapter>,
        revolt: Arc<dyn PlatformAdapter>,
        options: RelayOptions,
    ) -> Self {
        Self {
            store,
            discord,
            revolt,
            options,
        }
    }

    fn adapter(&self, platform: Platform) -> &Arc<dyn PlatformAdapter> {
        match platform {
            Platform::Discord => &self.discord,
            Platform::Revolt => &self.revolt,
        }
    }

    /// Relay one message across `bridge`. Never fails.
    pub async fn relay(&self, message: &InboundMessage, bridge: &Bridge) -> RelayOutcome {
        if !bridge.enabled {
            return RelayOutcome::Skipped;
        }

        let source = message.platform;
        let adapter = self.adapter(source.opposite());
        let target = adapter.platform();

        // Resolving
        let masquerade = self.store.find_masquerade(bridge.id, &message.author.id);
        let identity = resolve_identity(masquerade.as_ref(), &message.author);

        // Transforming
        let transformed = content::transform(message, self.options.rehost_images);

        // Dispatching
        let sent = adapter
            .send_message(target.channel_of(bridge), &transformed.content, Some(&identity))
            .await;

        match sent {
            Ok(handle) => {
                self.store.log(
                    LogLevel::Info,
                    format!("Successfully relayed {source} message to {target}"),
                    Some(json!({
                        "messageId": message.id,
                        "attachmentCount": transformed.attachment_count,
                    })),
                );
                RelayOutcome::Delivered {
                    message_id: handle.message_id,
                    attachment_count: transformed.attachment_count,
                }
            }
            Err(e) => {
                let stage = match e {
                    RelayError::UploadFailed { .. } => RelayStage::Transforming,
                    _ => RelayStage::Dispatching,
                };
                self.store.log(
                    LogLevel::Error,
                    format!("Failed to relay {source} message to {target}"),
                    Some(json!({
                        "error": e.to_string(),
                        "messageId": message.id,
                        "bridgeId": bridge.id,
                        "stage": stage.to_string(),
                    })),
                );
                RelayOutcome::Failed {
                    stage,
                    error: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl InboundHandler for Relay {
    async fn on_message(&self, message: InboundMessage, bridge: Bridge) {
        self.relay(&message, &bridge).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::models::{LogLevel, NewBridge, NewMasquerade};
    use crate::platform::testing::{inbound, RecordingAdapter};
    use crate::platform::{dispatch_inbound, InboundAttachment};
    use tokio::sync::mpsc;

    struct Harness {
        store: ConfigStore,
        discord: Arc<RecordingAdapter>,
        revolt: Arc<RecordingAdapter>,
        relay: Relay,
        bridge: Bridge,
    }

    fn harness(options: RelayOptions) -> Harness {
        let store = ConfigStore::new();
        let bridge = store.create_bridge(NewBridge {
            discord_channel_id: "d1".into(),
            revolt_channel_id: "r1".into(),
            enabled: None,
        });
        let discord = RecordingAdapter::new(Platform::Discord);
        let revolt = RecordingAdapter::new(Platform::Revolt);
        let relay = Relay::new(store.clone(), discord.clone(), revolt.clone(), options);
        Harness {
            store,
            discord,
            revolt,
            relay,
            bridge,
        }
    }

    fn author() -> Author {
        inbound(Platform::Discord, "d1", "").author
    }

    fn masquerade(username: &str, avatar: Option<&str>, enabled: bool) -> Masquerade {
        Masquerade {
            id: 1,
            bridge_id: 1,
            user_id: "u1".into(),
            username: username.into(),
            avatar: avatar.map(String::from),
            enabled,
        }
    }

    #[test]
    fn test_override_name_with_native_avatar() {
        let identity = resolve_identity(Some(&masquerade("Alice", None, true)), &author());
        assert_eq!(
            identity,
            Identity {
                display_name: "Alice".into(),
                avatar_url: Some("http://native/a.png".into()),
            }
        );
    }

    #[test]
    fn test_override_avatar_wins_when_set() {
        let identity = resolve_identity(
            Some(&masquerade("Alice", Some("http://override/b.png"), true)),
            &author(),
        );
        assert_eq!(identity.avatar_url.as_deref(), Some("http://override/b.png"));
    }

    #[test]
    fn test_blank_override_avatar_keeps_native() {
        for blank in ["", "  "] {
            let identity =
                resolve_identity(Some(&masquerade("Alice", Some(blank), true)), &author());
            assert_eq!(identity.display_name, "Alice");
            assert_eq!(identity.avatar_url.as_deref(), Some("http://native/a.png"));
        }
    }

    #[test]
    fn test_native_identity_without_override() {
        let identity = resolve_identity(None, &author());
        assert_eq!(identity.display_name, "OriginalName");
        assert_eq!(identity.avatar_url.as_deref(), Some("http://native/a.png"));
    }

    #[test]
    fn test_disabled_override_is_ignored() {
        let identity = resolve_identity(Some(&masquerade("Alice", None, false)), &author());
        assert_eq!(identity.display_name, "OriginalName");
    }

    #[test]
    fn test_empty_native_name_falls_back() {
        let mut nameless = author();
        nameless.display_name.clear();
        assert_eq!(resolve_identity(None, &nameless).display_name, UNKNOWN_USER);
    }

    #[tokio::test]
    async fn test_end_to_end_delivery() {
        let h = harness(RelayOptions::default());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(inbound(Platform::Discord, "d1", "hello")).unwrap();
        drop(tx);

        dispatch_inbound(Platform::Discord, rx, h.store.clone(), h.relay.clone()).await;

        let sent = h.revolt.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel_ref, "r1");
        assert_eq!(sent[0].content.text, "hello");
        assert_eq!(
            sent[0].identity,
            Some(Identity {
                display_name: "OriginalName".into(),
                avatar_url: Some("http://native/a.png".into()),
            })
        );
        assert!(h.discord.sent().is_empty());

        let logs = h.store.logs(None);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Info);
        assert_eq!(logs[0].message, "Successfully relayed Discord message to Revolt");
        assert_eq!(logs[0].metadata.as_ref().unwrap()["messageId"], "m1");
    }

    #[tokio::test]
    async fn test_masquerade_applied_on_bridge() {
        let h = harness(RelayOptions::default());
        h.store.create_masquerade(NewMasquerade {
            bridge_id: h.bridge.id,
            user_id: "u1".into(),
            username: "Alice".into(),
            avatar: None,
            enabled: None,
        });

        let outcome = h
            .relay
            .relay(&inbound(Platform::Revolt, "r1", "hi"), &h.bridge)
            .await;

        assert!(matches!(outcome, RelayOutcome::Delivered { .. }));
        let sent = h.discord.sent();
        assert_eq!(sent[0].channel_ref, "d1");
        let identity = sent[0].identity.as_ref().unwrap();
        assert_eq!(identity.display_name, "Alice");
        assert_eq!(identity.avatar_url.as_deref(), Some("http://native/a.png"));
    }

    #[tokio::test]
    async fn test_send_failure_logs_once_and_continues() {
        let h = harness(RelayOptions::default());
        h.revolt.fail_with("boom");
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(inbound(Platform::Discord, "d1", "first")).unwrap();
        let mut second = inbound(Platform::Discord, "d1", "second");
        second.id = "m2".into();
        tx.send(second).unwrap();
        drop(tx);

        dispatch_inbound(Platform::Discord, rx, h.store.clone(), h.relay.clone()).await;

        let errors: Vec<_> = h
            .store
            .logs(None)
            .into_iter()
            .filter(|e| e.level == LogLevel::Error)
            .collect();
        assert_eq!(errors.len(), 2);
        let metadata = errors[0].metadata.as_ref().unwrap();
        assert_eq!(errors[0].message, "Failed to relay Discord message to Revolt");
        assert_eq!(metadata["messageId"], "m1");
        assert_eq!(metadata["stage"], "dispatching");
        assert_eq!(errors[1].metadata.as_ref().unwrap()["messageId"], "m2");
    }

    #[tokio::test]
    async fn test_dashboard_masquerade_without_avatar() {
        let h = harness(RelayOptions::default());
        let new: NewMasquerade = serde_json::from_value(serde_json::json!({
            "bridgeId": h.bridge.id,
            "userId": "u1",
            "username": "Alice",
            "avatar": ""
        }))
        .unwrap();
        h.store.create_masquerade(new);

        h.relay
            .relay(&inbound(Platform::Discord, "d1", "hi"), &h.bridge)
            .await;

        assert_eq!(
            h.revolt.sent()[0].identity,
            Some(Identity {
                display_name: "Alice".into(),
                avatar_url: Some("http://native/a.png".into()),
            })
        );
    }

    #[tokio::test]
    async fn test_upload_failure_stops_in_transforming() {
        let h = harness(RelayOptions {
            rehost_images: true,
        });
        h.revolt.fail_upload("https://cdn/cat.png");
        let mut message = inbound(Platform::Discord, "d1", "cat");
        message.attachments = vec![InboundAttachment {
            url: "https://cdn/cat.png".into(),
            content_type: Some("image/png".into()),
            filename: Some("cat.png".into()),
        }];

        let outcome = h.relay.relay(&message, &h.bridge).await;

        assert!(matches!(
            outcome,
            RelayOutcome::Failed {
                stage: RelayStage::Transforming,
                ..
            }
        ));
        let logs = h.store.logs(None);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
        let metadata = logs[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["stage"], "transforming");
        assert_eq!(metadata["messageId"], "m1");
        assert_eq!(metadata["bridgeId"], h.bridge.id);
        assert!(metadata["error"]
            .as_str()
            .unwrap()
            .contains("https://cdn/cat.png"));
        assert!(h.revolt.sent().is_empty());
    }

    #[tokio::test]
    async fn test_not_ready_target_fails_relay() {
        let h = harness(RelayOptions::default());
        h.discord.set_ready(false);

        let outcome = h
            .relay
            .relay(&inbound(Platform::Revolt, "r1", "hi"), &h.bridge)
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Failed {
                stage: RelayStage::Dispatching,
                error: "Discord bot not ready".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_disabled_bridge_is_skipped() {
        let h = harness(RelayOptions::default());
        let mut bridge = h.bridge.clone();
        bridge.enabled = false;

        let outcome = h
            .relay
            .relay(&inbound(Platform::Discord, "d1", "hi"), &bridge)
            .await;

        assert_eq!(outcome, RelayOutcome::Skipped);
        assert!(h.revolt.sent().is_empty());
        assert_eq!(h.store.log_count(), 0);
    }

    #[tokio::test]
    async fn test_image_asymmetry_is_preserved() {
        let h = harness(RelayOptions::default());
        let pdf = InboundAttachment {
            url: "https://files/doc.pdf".into(),
            content_type: Some("application/pdf".into()),
            filename: None,
        };

        let mut from_discord = inbound(Platform::Discord, "d1", "doc");
        from_discord.attachments = vec![pdf.clone()];
        let mut from_revolt = inbound(Platform::Revolt, "r1", "doc");
        from_revolt.attachments = vec![pdf];

        h.relay.relay(&from_discord, &h.bridge).await;
        h.relay.relay(&from_revolt, &h.bridge).await;

        assert_eq!(h.revolt.sent()[0].content.text, "doc");
        assert_eq!(h.discord.sent()[0].content.text, "doc\nhttps://files/doc.pdf");
    }

    #[tokio::test]
    async fn test_rehost_sends_uploads() {
        let h = harness(RelayOptions {
            rehost_images: true,
        });
        let mut message = inbound(Platform::Discord, "d1", "cat");
        message.attachments = vec![InboundAttachment {
            url: "https://cdn/cat.png".into(),
            content_type: Some("image/png".into()),
            filename: Some("cat.png".into()),
        }];

        let outcome = h.relay.relay(&message, &h.bridge).await;

        assert_eq!(
            outcome,
            RelayOutcome::Delivered {
                message_id: "sent-1".into(),
                attachment_count: 1,
            }
        );
        assert_eq!(h.revolt.sent()[0].content.uploads, vec!["https://cdn/cat.png".to_string()]);
    }
}
