//! Revolt Bonfire session.
//!
//! Authenticate → `Authenticated` → `Ready` (user cache seeded) → `Ping`
//! every 20 seconds. `Message` events are resolved to their author and
//! published to the inbound channel.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{interval, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::api::{RevoltApi, RevoltMessage, RevoltUser};
use super::{normalize_message, RevoltSession};
use crate::bridge::models::LogLevel;
use crate::bridge::ConfigStore;
use crate::error::{RelayError, Result};
use crate::platform::reconnect::reconnect_loop;
use crate::platform::{InboundMessage, InboundSender, Platform};

pub const REVOLT_WS_URL: &str = "wss://ws.revolt.chat?version=1&format=json";

const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Bonfire errors that mean the token itself is unusable.
const FATAL_ERRORS: [&str; 2] = ["InvalidSession", "OnboardingNotFinished"];

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerEvent {
    Authenticated,
    Ready {
        #[serde(default)]
        users: Vec<RevoltUser>,
    },
    Message(RevoltMessage),
    Error {
        error: Value,
    },
    #[serde(other)]
    Other,
}

pub struct RevoltGateway {
    url: String,
    token: String,
    autumn_url: String,
    api: Arc<dyn RevoltApi>,
    session: Arc<RevoltSession>,
    store: ConfigStore,
    inbound: InboundSender,
}

impl RevoltGateway {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        autumn_url: impl Into<String>,
        api: Arc<dyn RevoltApi>,
        session: Arc<RevoltSession>,
        store: ConfigStore,
        inbound: InboundSender,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            autumn_url: autumn_url.into(),
            api,
            session,
            store,
            inbound,
        }
    }

    /// Run sessions until the login is rejected or the task is aborted.
    pub async fn run(self) {
        self.store.log(LogLevel::Info, "Attempting Revolt bot login", None);
        reconnect_loop(Platform::Revolt, &self.store, || self.connect_once()).await;
        self.session.set_ready(false);
    }

    async fn connect_once(&self) -> Result<()> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        tracing::debug!("[Revolt] Connected to Bonfire");
        let (mut sink, mut stream) = ws.split();

        let authenticate = json!({ "type": "Authenticate", "token": self.token });
        sink.send(WsMessage::Text(authenticate.to_string())).await?;

        let mut ping = interval(PING_INTERVAL);
        ping.tick().await;

        let result = loop {
            tokio::select! {
                _ = ping.tick() => {
                    let beat = json!({ "type": "Ping", "data": chrono::Utc::now().timestamp_millis() });
                    if let Err(e) = sink.send(WsMessage::Text(beat.to_string())).await {
                        break Err(e.into());
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let event: ServerEvent = match serde_json::from_str(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                tracing::trace!(error = %e, "[Revolt] Skipping unparsed event");
                                continue;
                            }
                        };
                        if let Err(e) = self.handle_event(event).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        tracing::info!(?frame, "[Revolt] Bonfire closed the connection");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                },
            }
        };

        self.session.set_ready(false);
        result
    }

    async fn handle_event(&self, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::Authenticated => {
                tracing::debug!("[Revolt] Authenticated");
            }
            ServerEvent::Ready { users } => {
                let count = users.len();
                for user in users {
                    self.session.cache_user(user);
                }
                self.session.set_ready(true);
                self.store.log(
                    LogLevel::Info,
                    "Revolt bot ready",
                    Some(json!({ "cachedUsers": count })),
                );
            }
            ServerEvent::Message(message) => {
                if let Some(inbound) = self.resolve(message).await {
                    if self.inbound.send(inbound).is_err() {
                        return Err(RelayError::Gateway("inbound channel closed".into()));
                    }
                }
            }
            ServerEvent::Error { error } => {
                let kind = error
                    .as_str()
                    .or_else(|| error.get("type").and_then(Value::as_str))
                    .unwrap_or("Unknown")
                    .to_string();
                return Err(if FATAL_ERRORS.contains(&kind.as_str()) {
                    RelayError::LoginFailed {
                        platform: Platform::Revolt,
                        reason: kind,
                    }
                } else {
                    RelayError::Gateway(kind)
                });
            }
            ServerEvent::Other => {}
        }
        Ok(())
    }

    /// Attach the author, fetching unknown users. Unresolvable authors drop
    /// the message.
    async fn resolve(&self, message: RevoltMessage) -> Option<InboundMessage> {
        let author = match self.session.cached_user(&message.author) {
            Some(user) => user,
            None => match self.api.fetch_user(&message.author).await {
                Ok(user) => {
                    self.session.cache_user(user.clone());
                    user
                }
                Err(e) => {
                    tracing::warn!(
                        user = message.author.as_str(),
                        error = %e,
                        "[Revolt] Could not resolve message author"
                    );
                    return None;
                }
            },
        };
        Some(normalize_message(message, &author, &self.autumn_url))
    }
}

#[cfg(test)]
mod tests {
    use super::super::api::{RevoltChannel, SendMessagePayload, SentMessage};
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct UserLookup {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl RevoltApi for UserLookup {
        async fn fetch_user(&self, user_id: &str) -> Result<RevoltUser> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if user_id == "ghost" {
                return Err(RelayError::Api {
                    platform: Platform::Revolt,
                    status: 404,
                    body: String::new(),
                });
            }
            Ok(serde_json::from_value(json!({ "_id": user_id, "username": "bob" }))?)
        }

        async fn get_channel(&self, _channel_id: &str) -> Result<RevoltChannel> {
            unreachable!()
        }

        async fn send_message(
            &self,
            _channel_id: &str,
            _payload: &SendMessagePayload,
        ) -> Result<SentMessage> {
            unreachable!()
        }

        async fn upload_attachment(&self, _source_url: &str) -> Result<String> {
            unreachable!()
        }
    }

    fn gateway(api: Arc<UserLookup>) -> (RevoltGateway, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = RevoltGateway::new(
            REVOLT_WS_URL,
            "token",
            "https://autumn.revolt.chat",
            api,
            RevoltSession::new(),
            ConfigStore::new(),
            tx,
        );
        (gateway, rx)
    }

    fn parse(value: Value) -> ServerEvent {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_ready_seeds_cache_and_marks_ready() {
        let api = Arc::new(UserLookup::default());
        let (gateway, mut rx) = gateway(api.clone());

        gateway
            .handle_event(parse(json!({
                "type": "Ready",
                "users": [{ "_id": "u1", "username": "alice" }],
                "servers": [],
                "channels": []
            })))
            .await
            .unwrap();
        assert!(gateway.session.is_ready());

        gateway
            .handle_event(parse(json!({
                "type": "Message",
                "_id": "m1",
                "channel": "r1",
                "author": "u1",
                "content": "hello"
            })))
            .await
            .unwrap();

        let inbound = rx.try_recv().unwrap();
        assert_eq!(inbound.author.display_name, "alice");
        assert_eq!(api.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_author_is_fetched_once() {
        let api = Arc::new(UserLookup::default());
        let (gateway, mut rx) = gateway(api.clone());
        let message = json!({ "type": "Message", "_id": "m1", "channel": "r1", "author": "u9" });

        gateway.handle_event(parse(message.clone())).await.unwrap();
        gateway.handle_event(parse(message)).await.unwrap();

        assert_eq!(rx.try_recv().unwrap().author.display_name, "bob");
        assert!(rx.try_recv().is_ok());
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_author_drops_message() {
        let api = Arc::new(UserLookup::default());
        let (gateway, mut rx) = gateway(api);

        gateway
            .handle_event(parse(json!({
                "type": "Message", "_id": "m1", "channel": "r1", "author": "ghost"
            })))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_session_is_login_failure() {
        let api = Arc::new(UserLookup::default());
        let (gateway, _rx) = gateway(api);

        let err = gateway
            .handle_event(parse(json!({ "type": "Error", "error": "InvalidSession" })))
            .await
            .unwrap_err();
        assert!(err.is_fatal_login());

        let err = gateway
            .handle_event(parse(json!({ "type": "Error", "error": "InternalError" })))
            .await
            .unwrap_err();
        assert!(!err.is_fatal_login());
    }

    #[test]
    fn test_unknown_events_are_ignored() {
        assert!(matches!(
            parse(json!({ "type": "Pong", "data": 1 })),
            ServerEvent::Other
        ));
        assert!(matches!(
            parse(json!({ "type": "ChannelStartTyping", "id": "r1", "user": "u1" })),
            ServerEvent::Other
        ));
    }
}
