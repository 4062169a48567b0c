//! Bridge lifecycle.
//!
//! [`BridgeSupervisor::initialize`] reads the current settings, connects
//! both platforms, and swaps the running bridge for the new one. It runs at
//! startup and after every settings change. The previous bridge's gateway
//! and dispatch tasks are aborted on swap, so a re-init never leaves two
//! connections delivering the same events.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::bridge::models::{LogLevel, Settings};
use crate::bridge::ConfigStore;
use crate::error::Result;
use crate::platform::discord::gateway::DiscordGateway;
use crate::platform::discord::{DiscordAdapter, DiscordHttp, DiscordSession};
use crate::platform::revolt::gateway::RevoltGateway;
use crate::platform::revolt::{RevoltAdapter, RevoltHttp, RevoltSession};
use crate::platform::{dispatch_inbound, InboundMessage, Platform, PlatformAdapter};
use crate::relay::{Relay, RelayOptions};
use crate::state::PlatformEndpoints;

// ── Tasks ────────────────────────────────────────────────────────────────────

/// Background tasks that are aborted together when the group is dropped.
#[derive(Default)]
pub struct TaskGroup(Vec<JoinHandle<()>>);

impl TaskGroup {
    pub fn push(&mut self, task: JoinHandle<()>) {
        self.0.push(task);
    }

    pub fn absorb(&mut self, mut other: TaskGroup) {
        self.0.append(&mut other.0);
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

// ── Connector ────────────────────────────────────────────────────────────────

/// A freshly started platform connection.
pub struct PlatformConnection {
    pub adapter: Arc<dyn PlatformAdapter>,
    pub inbound: mpsc::UnboundedReceiver<InboundMessage>,
    pub tasks: TaskGroup,
}

/// Opens platform connections for a token.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    async fn connect(&self, platform: Platform, token: &str) -> Result<PlatformConnection>;
}

/// Connects to the real Discord and Revolt services.
pub struct LiveConnector {
    http: reqwest::Client,
    endpoints: PlatformEndpoints,
    store: ConfigStore,
}

impl LiveConnector {
    pub fn new(endpoints: PlatformEndpoints, store: ConfigStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
            store,
        }
    }
}

#[async_trait]
impl PlatformConnector for LiveConnector {
    async fn connect(&self, platform: Platform, token: &str) -> Result<PlatformConnection> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = TaskGroup::default();

        let adapter: Arc<dyn PlatformAdapter> = match platform {
            Platform::Discord => {
                let api = Arc::new(DiscordHttp::new(
                    self.http.clone(),
                    &self.endpoints.discord_api,
                    token,
                ));
                let session = DiscordSession::new();
                let gateway = DiscordGateway::new(
                    &self.endpoints.discord_gateway,
                    token,
                    session.clone(),
                    self.store.clone(),
                    tx,
                );
                tasks.push(tokio::spawn(gateway.run()));
                Arc::new(DiscordAdapter::new(api, session, self.store.clone()))
            }
            Platform::Revolt => {
                let api = Arc::new(RevoltHttp::new(
                    self.http.clone(),
                    &self.endpoints.revolt_api,
                    &self.endpoints.revolt_autumn,
                    token,
                ));
                let session = RevoltSession::new();
                let gateway = RevoltGateway::new(
                    &self.endpoints.revolt_ws,
                    token,
                    &self.endpoints.revolt_autumn,
                    api.clone(),
                    session.clone(),
                    self.store.clone(),
                    tx,
                );
                tasks.push(tokio::spawn(gateway.run()));
                Arc::new(RevoltAdapter::new(api, session, self.store.clone()))
            }
        };

        Ok(PlatformConnection {
            adapter,
            inbound: rx,
            tasks,
        })
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────────

/// Result of an initialization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// A new bridge is running.
    Running,
    /// Tokens are missing; nothing is running.
    Idle,
    /// Startup failed; the previous bridge, if any, keeps running.
    Failed,
}

/// The running bridge: both adapters and every task feeding them.
struct ActiveBridge {
    discord: Arc<dyn PlatformAdapter>,
    revolt: Arc<dyn PlatformAdapter>,
    _tasks: TaskGroup,
}

/// Readiness of the running bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStatus {
    pub discord_ready: bool,
    pub revolt_ready: bool,
}

pub struct BridgeSupervisor {
    store: ConfigStore,
    connector: Arc<dyn PlatformConnector>,
    options: RelayOptions,
    /// Held for the whole of `initialize`, which serializes re-inits.
    active: Mutex<Option<ActiveBridge>>,
}

impl BridgeSupervisor {
    pub fn new(
        store: ConfigStore,
        connector: Arc<dyn PlatformConnector>,
        options: RelayOptions,
    ) -> Self {
        Self {
            store,
            connector,
            options,
            active: Mutex::new(None),
        }
    }

    /// (Re)start the bridge from the current settings. Never fails; the
    /// outcome is recorded in the log store.
    pub async fn initialize(&self) -> InitOutcome {
        let mut active = self.active.lock().await;
        let settings = self.store.settings();
        let discord_present = !settings.discord_token.is_empty();
        let revolt_present = !settings.revolt_token.is_empty();

        self.store.log(
            LogLevel::Info,
            "Attempting to initialize bridge with settings",
            Some(json!({
                "discordTokenPresent": discord_present,
                "revoltTokenPresent": revolt_present,
            })),
        );

        if !settings.has_tokens() {
            self.store.log(
                LogLevel::Error,
                "Bot tokens not configured",
                Some(json!({
                    "discordTokenSet": discord_present,
                    "revoltTokenSet": revolt_present,
                })),
            );
            if active.take().is_some() {
                tracing::info!("[Bridge] Stopped running bridge");
            }
            return InitOutcome::Idle;
        }

        match self.start(&settings).await {
            Ok(bridge) => {
                // Dropping the previous bridge aborts its tasks.
                *active = Some(bridge);
                self.store.clear_error_logs();
                self.store
                    .log(LogLevel::Info, "Bridge initialized successfully", None);
                InitOutcome::Running
            }
            Err(e) => {
                self.store.log(
                    LogLevel::Error,
                    "Failed to initialize bridge",
                    Some(json!({
                        "error": e.to_string(),
                        "detail": format!("{e:?}"),
                    })),
                );
                InitOutcome::Failed
            }
        }
    }

    async fn start(&self, settings: &Settings) -> Result<ActiveBridge> {
        let discord = self
            .connector
            .connect(Platform::Discord, &settings.discord_token)
            .await?;
        let revolt = self
            .connector
            .connect(Platform::Revolt, &settings.revolt_token)
            .await?;

        let relay = Relay::new(
            self.store.clone(),
            discord.adapter.clone(),
            revolt.adapter.clone(),
            self.options,
        );

        let mut tasks = TaskGroup::default();
        tasks.absorb(discord.tasks);
        tasks.absorb(revolt.tasks);
        tasks.push(tokio::spawn(dispatch_inbound(
            Platform::Discord,
            discord.inbound,
            self.store.clone(),
            relay.clone(),
        )));
        tasks.push(tokio::spawn(dispatch_inbound(
            Platform::Revolt,
            revolt.inbound,
            self.store.clone(),
            relay,
        )));

        tracing::info!(tasks = tasks.len(), "[Bridge] Bridge tasks started");

        Ok(ActiveBridge {
            discord: discord.adapter,
            revolt: revolt.adapter,
            _tasks: tasks,
        })
    }

    /// Readiness of the running bridge, or `None` when idle.
    pub async fn status(&self) -> Option<BridgeStatus> {
        self.active.lock().await.as_ref().map(|bridge| BridgeStatus {
            discord_ready: bridge.discord.is_ready(),
            revolt_ready: bridge.revolt.is_ready(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Connector that hands out recording adapters.

    use super::*;
    use crate::error::RelayError;
    use crate::platform::testing::RecordingAdapter;
    use parking_lot::Mutex as SyncMutex;

    #[derive(Default)]
    pub struct FakeConnector {
        pub fail_revolt: bool,
        pub connects: SyncMutex<Vec<(Platform, String)>>,
        /// Senders for the most recent connection of each platform.
        pub senders: SyncMutex<Vec<(Platform, mpsc::UnboundedSender<InboundMessage>)>>,
        pub adapters: SyncMutex<Vec<Arc<RecordingAdapter>>>,
    }

    impl FakeConnector {
        pub fn sender(&self, platform: Platform) -> Option<mpsc::UnboundedSender<InboundMessage>> {
            self.senders
                .lock()
                .iter()
                .rev()
                .find(|(p, _)| *p == platform)
                .map(|(_, tx)| tx.clone())
        }

        pub fn latest_adapter(&self, platform: Platform) -> Option<Arc<RecordingAdapter>> {
            self.adapters
                .lock()
                .iter()
                .rev()
                .find(|a| a.platform() == platform)
                .cloned()
        }
    }

    #[async_trait]
    impl PlatformConnector for FakeConnector {
        async fn connect(&self, platform: Platform, token: &str) -> Result<PlatformConnection> {
            self.connects.lock().push((platform, token.to_string()));
            if platform == Platform::Revolt && self.fail_revolt {
                return Err(RelayError::LoginFailed {
                    platform,
                    reason: "bad token".into(),
                });
            }

            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().push((platform, tx));
            let adapter = RecordingAdapter::new(platform);
            self.adapters.lock().push(adapter.clone());
            Ok(PlatformConnection {
                adapter,
                inbound: rx,
                tasks: TaskGroup::default(),
            })
        }
    }
}
