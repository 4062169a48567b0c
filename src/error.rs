//! # Error Handling
//!
//! Error types for the relay engine and the admin surface.
//!
//! ```text
//! RelayError
//! ├── Relay path (logged, never propagated past the coordinator)
//! │   ├── NotReady         - adapter used before the platform confirmed login
//! │   ├── LoginFailed      - platform rejected the bot token
//! │   ├── InvalidChannel   - wrong channel type or missing permissions
//! │   └── UploadFailed     - attachment could not be rehosted
//! ├── Transport
//! │   ├── Api              - platform answered with a non-success status
//! │   ├── Http             - request never completed
//! │   ├── WebSocket        - gateway socket failure
//! │   ├── Gateway          - gateway protocol violation
//! │   └── Serialization    - payload (de)serialization
//! └── Admin path
//!     └── NotFound         - update on an unknown id
//! ```

use thiserror::Error;

use crate::platform::Platform;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The adapter has not received its ready event yet.
    #[error("{platform} bot not ready")]
    NotReady { platform: Platform },

    /// The platform refused the configured token.
    #[error("{platform} bot login failed: {reason}")]
    LoginFailed { platform: Platform, reason: String },

    /// The target channel cannot receive messages from the bot.
    #[error("Invalid channel {channel}: {reason}")]
    InvalidChannel { channel: String, reason: String },

    /// Attachment fetch or re-upload failed.
    #[error("Failed to upload file {url}: {reason}")]
    UploadFailed { url: String, reason: String },

    /// Admin update referenced an id that does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Non-success HTTP status from a platform API.
    #[error("{platform} API request failed ({status}): {body}")]
    Api {
        platform: Platform,
        status: u16,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Gateway protocol error: {0}")]
    Gateway(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether retrying the gateway connection can ever succeed.
    pub fn is_fatal_login(&self) -> bool {
        matches!(self, Self::LoginFailed { .. })
    }
}
