//! Masquerade Relay
//!
//! Relays chat messages between Discord and Revolt channel pairs while
//! keeping the sender's identity:
//!
//! 1. **Bridges**: each bridge links one Discord channel to one Revolt
//!    channel. Messages on either side are re-posted on the other.
//!
//! 2. **Masquerades**: Discord messages appear under the sender's name and
//!    avatar through a per-channel webhook; Revolt messages carry a
//!    masquerade. Per-bridge overrides can replace a user's name or avatar.
//!
//! 3. **Admin API**: bridges, masquerades, bot tokens and the recent log
//!    feed are managed over HTTP. Changing the tokens restarts the bridge.
//!
//! Everything lives in memory; a restart begins from an empty store seeded
//! only by the command-line tokens.

mod bridge;
mod error;
mod lifecycle;
mod platform;
mod relay;
mod state;

use std::sync::Arc;

use axum::http::Method;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use bridge::models::{LogLevel, SettingsPatch};
use bridge::ConfigStore;
use lifecycle::{BridgeSupervisor, LiveConnector};
use relay::RelayOptions;
use state::{AppState, PlatformEndpoints, RelayConfig};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "masquerade-relay", version, about = "Discord ↔ Revolt masquerade relay")]
struct Args {
    /// Port for the admin API
    #[arg(short, long, default_value_t = 5000, env = "RELAY_PORT")]
    port: u16,

    /// Discord bot token to seed the settings with
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    discord_token: Option<String>,

    /// Revolt bot token to seed the settings with
    #[arg(long, env = "REVOLT_TOKEN", hide_env_values = true)]
    revolt_token: Option<String>,

    /// Initial log level for the dashboard log feed
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Upload Discord images to Revolt's file server instead of linking them
    #[arg(long, env = "REHOST_IMAGES")]
    rehost_images: bool,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[arg(long, default_value = platform::discord::api::DISCORD_API_BASE, env = "DISCORD_API_URL")]
    discord_api_url: String,

    #[arg(long, default_value = platform::discord::gateway::DISCORD_GATEWAY_URL, env = "DISCORD_GATEWAY_URL")]
    discord_gateway_url: String,

    #[arg(long, default_value = platform::revolt::api::REVOLT_API_BASE, env = "REVOLT_API_URL")]
    revolt_api_url: String,

    #[arg(long, default_value = platform::revolt::gateway::REVOLT_WS_URL, env = "REVOLT_WS_URL")]
    revolt_ws_url: String,

    #[arg(long, default_value = platform::revolt::api::AUTUMN_BASE, env = "REVOLT_AUTUMN_URL")]
    revolt_autumn_url: String,
}

impl Args {
    fn config(&self) -> RelayConfig {
        RelayConfig {
            port: self.port,
            endpoints: PlatformEndpoints {
                discord_api: self.discord_api_url.clone(),
                discord_gateway: self.discord_gateway_url.clone(),
                revolt_api: self.revolt_api_url.clone(),
                revolt_ws: self.revolt_ws_url.clone(),
                revolt_autumn: self.revolt_autumn_url.clone(),
            },
            relay: RelayOptions {
                rehost_images: self.rehost_images,
            },
        }
    }

    /// Settings seeded from the command line, if any were given.
    fn settings_seed(&self) -> Option<SettingsPatch> {
        if self.discord_token.is_none() && self.revolt_token.is_none() && self.log_level.is_none() {
            return None;
        }
        Some(SettingsPatch {
            discord_token: self.discord_token.clone(),
            revolt_token: self.revolt_token.clone(),
            webhook_url: None,
            log_level: self.log_level,
        })
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "masquerade_relay=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Gateways connect over rustls; pick the provider before any TLS handshake.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = args.config();
    let store = ConfigStore::new();
    if let Some(seed) = args.settings_seed() {
        store.update_settings(seed);
    }

    let connector = Arc::new(LiveConnector::new(config.endpoints.clone(), store.clone()));
    let supervisor = Arc::new(BridgeSupervisor::new(store.clone(), connector, config.relay));

    tracing::info!("[Bridge] Starting initial bridge setup");
    let startup = supervisor.clone();
    tokio::spawn(async move {
        let outcome = startup.initialize().await;
        tracing::info!(?outcome, "[Bridge] Initial bridge setup finished");
    });

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    let app = bridge::api::router(AppState::new(store, supervisor))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(rehost_images = config.relay.rehost_images, "Masquerade relay starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
