//! Server configuration and shared handler state.

use std::sync::Arc;

use crate::bridge::ConfigStore;
use crate::lifecycle::BridgeSupervisor;
use crate::platform::discord::api::DISCORD_API_BASE;
use crate::platform::discord::gateway::DISCORD_GATEWAY_URL;
use crate::platform::revolt::api::{AUTUMN_BASE, REVOLT_API_BASE};
use crate::platform::revolt::gateway::REVOLT_WS_URL;
use crate::relay::RelayOptions;

/// Default admin API port.
const DEFAULT_PORT: u16 = 5000;

/// Where each platform's services live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEndpoints {
    pub discord_api: String,
    pub discord_gateway: String,
    pub revolt_api: String,
    pub revolt_ws: String,
    /// Revolt file server, used for avatars, attachments and uploads.
    pub revolt_autumn: String,
}

impl Default for PlatformEndpoints {
    fn default() -> Self {
        Self {
            discord_api: DISCORD_API_BASE.to_string(),
            discord_gateway: DISCORD_GATEWAY_URL.to_string(),
            revolt_api: REVOLT_API_BASE.to_string(),
            revolt_ws: REVOLT_WS_URL.to_string(),
            revolt_autumn: AUTUMN_BASE.to_string(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub endpoints: PlatformEndpoints,
    pub relay: RelayOptions,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            endpoints: PlatformEndpoints::default(),
            relay: RelayOptions::default(),
        }
    }
}

/// State shared by the admin API handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: ConfigStore,
    pub supervisor: Arc<BridgeSupervisor>,
}

impl AppState {
    pub fn new(store: ConfigStore, supervisor: Arc<BridgeSupervisor>) -> Self {
        Self { store, supervisor }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 5000);
        assert!(!config.relay.rehost_images);
        assert_eq!(config.endpoints.discord_api, "https://discord.com/api/v10");
        assert_eq!(config.endpoints.revolt_autumn, "https://autumn.revolt.chat");
    }
}
