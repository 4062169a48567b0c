//! Discord gateway session.
//!
//! Hello → Identify → heartbeat loop. `READY` marks the shared session ready,
//! `MESSAGE_CREATE` is normalized and published to the inbound channel.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{interval, Duration};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::api::DiscordMessage;
use super::{normalize_message, DiscordSession};
use crate::bridge::models::LogLevel;
use crate::bridge::ConfigStore;
use crate::error::{RelayError, Result};
use crate::platform::reconnect::reconnect_loop;
use crate::platform::{InboundSender, Platform};

/// Public gateway URL, API v10 with JSON encoding.
pub const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
pub const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

#[derive(Debug, Deserialize)]
struct GatewayEvent {
    op: u8,
    #[serde(default)]
    d: Option<Value>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// What the session loop should do after a dispatch.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Nobody is listening for inbound messages any more.
    Stop,
}

/// Close codes after which reconnecting with the same token is pointless.
fn fatal_close_reason(code: u16) -> Option<&'static str> {
    match code {
        4004 => Some("Authentication failed"),
        4010 => Some("Invalid shard"),
        4011 => Some("Sharding required"),
        4012 => Some("Invalid API version"),
        4013 => Some("Invalid intents"),
        4014 => Some("Disallowed intents (enable the Message Content intent)"),
        _ => None,
    }
}

pub struct DiscordGateway {
    url: String,
    token: String,
    session: Arc<DiscordSession>,
    store: ConfigStore,
    inbound: InboundSender,
}

impl DiscordGateway {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        session: Arc<DiscordSession>,
        store: ConfigStore,
        inbound: InboundSender,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            session,
            store,
            inbound,
        }
    }

    /// Run sessions until the login is rejected or the task is aborted.
    pub async fn run(self) {
        self.store.log(LogLevel::Info, "Attempting Discord bot login", None);
        reconnect_loop(Platform::Discord, &self.store, || self.connect_once()).await;
        self.session.set_ready(false);
    }

    async fn connect_once(&self) -> Result<()> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        tracing::debug!("[Discord] Connected to gateway");

        let result = self.drive(ws).await;
        self.session.set_ready(false);
        result
    }

    async fn drive(&self, mut ws: WsStream) -> Result<()> {
        let hello = loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => break serde_json::from_str::<GatewayEvent>(&text)?,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(RelayError::Gateway("closed before Hello".into())),
            }
        };
        if hello.op != opcode::HELLO {
            return Err(RelayError::Gateway(format!("expected Hello, got op {}", hello.op)));
        }
        let heartbeat_ms = hello
            .d
            .as_ref()
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HEARTBEAT_MS);

        let identify = json!({
            "op": opcode::IDENTIFY,
            "d": {
                "token": self.token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "masquerade-relay",
                    "device": "masquerade-relay"
                }
            }
        });
        ws.send(WsMessage::Text(identify.to_string())).await?;

        let mut sequence: Option<u64> = None;
        let mut heartbeat = interval(Duration::from_millis(heartbeat_ms));
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = json!({ "op": opcode::HEARTBEAT, "d": sequence });
                    ws.send(WsMessage::Text(beat.to_string())).await?;
                }
                frame = ws.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let event: GatewayEvent = match serde_json::from_str(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                tracing::warn!(error = %e, "[Discord] Failed to parse gateway event");
                                continue;
                            }
                        };
                        if event.s.is_some() {
                            sequence = event.s;
                        }
                        match event.op {
                            opcode::DISPATCH => {
                                let flow = self.handle_dispatch(event.t.as_deref(), event.d);
                                if flow == Flow::Stop {
                                    break Ok(());
                                }
                            }
                            opcode::HEARTBEAT => {
                                let beat = json!({ "op": opcode::HEARTBEAT, "d": sequence });
                                ws.send(WsMessage::Text(beat.to_string())).await?;
                            }
                            opcode::RECONNECT => {
                                tracing::info!("[Discord] Gateway requested reconnect");
                                break Ok(());
                            }
                            opcode::INVALID_SESSION => {
                                tracing::warn!("[Discord] Invalid session");
                                break Ok(());
                            }
                            opcode::HEARTBEAT_ACK => {}
                            op => tracing::trace!(op, "[Discord] Unhandled opcode"),
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => break close_result(frame),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                },
            }
        }
    }

    fn handle_dispatch(&self, event_type: Option<&str>, data: Option<Value>) -> Flow {
        let (Some(event_type), Some(data)) = (event_type, data) else {
            return Flow::Continue;
        };

        match event_type {
            "READY" => {
                let user = data.get("user");
                let id = user.and_then(|u| u.get("id")).and_then(Value::as_str);
                let username = user
                    .and_then(|u| u.get("username"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                if let Some(id) = id {
                    self.session.set_bot_user_id(id);
                }
                self.session.set_ready(true);
                self.store.log(
                    LogLevel::Info,
                    "Discord bot ready",
                    Some(json!({ "username": username, "id": id })),
                );
                Flow::Continue
            }
            "MESSAGE_CREATE" => {
                let message: DiscordMessage = match serde_json::from_value(data) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "[Discord] Malformed MESSAGE_CREATE");
                        return Flow::Continue;
                    }
                };
                match normalize_message(message) {
                    Some(inbound) => {
                        if self.inbound.send(inbound).is_err() {
                            Flow::Stop
                        } else {
                            Flow::Continue
                        }
                    }
                    None => Flow::Continue,
                }
            }
            _ => Flow::Continue,
        }
    }
}

fn close_result(frame: Option<CloseFrame<'_>>) -> Result<()> {
    let Some(frame) = frame else {
        return Ok(());
    };
    let code = u16::from(frame.code);
    match fatal_close_reason(code) {
        Some(reason) => Err(RelayError::LoginFailed {
            platform: Platform::Discord,
            reason: reason.to_string(),
        }),
        None => Err(RelayError::Gateway(format!(
            "closed with code {code}: {}",
            frame.reason
        ))),
    }
}
