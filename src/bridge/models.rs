//! Bridge configuration types.
//!
//! Wire names are camelCase to match the dashboard's contract.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ── Bridges ──────────────────────────────────────────────────────────────────

/// A route between one Discord channel and one Revolt channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bridge {
    pub id: i64,
    pub discord_channel_id: String,
    pub revolt_channel_id: String,
    pub enabled: bool,
}

/// POST /api/bridges body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBridge {
    pub discord_channel_id: String,
    pub revolt_channel_id: String,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// PATCH /api/bridges/:id body. Omitted fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgePatch {
    pub discord_channel_id: Option<String>,
    pub revolt_channel_id: Option<String>,
    pub enabled: Option<bool>,
}

impl Bridge {
    pub(crate) fn apply(&mut self, patch: BridgePatch) {
        if let Some(channel) = patch.discord_channel_id {
            self.discord_channel_id = channel;
        }
        if let Some(channel) = patch.revolt_channel_id {
            self.revolt_channel_id = channel;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
    }
}

// ── Masquerades ──────────────────────────────────────────────────────────────

/// Per-bridge identity override for one platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Masquerade {
    pub id: i64,
    pub bridge_id: i64,
    /// Platform user id of the sender this override applies to.
    pub user_id: String,
    /// Display name used instead of the sender's own.
    pub username: String,
    /// Avatar URL; `None` keeps the sender's native avatar.
    pub avatar: Option<String>,
    pub enabled: bool,
}

/// POST /api/masquerades body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMasquerade {
    pub bridge_id: i64,
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// PATCH /api/masquerades/:id body.
///
/// `avatar` distinguishes "omitted" (`None`) from an explicit `null`
/// (`Some(None)`), which clears the override avatar.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasqueradePatch {
    pub bridge_id: Option<i64>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub avatar: Option<Option<String>>,
    pub enabled: Option<bool>,
}

impl Masquerade {
    pub(crate) fn apply(&mut self, patch: MasqueradePatch) {
        if let Some(bridge_id) = patch.bridge_id {
            self.bridge_id = bridge_id;
        }
        if let Some(user_id) = patch.user_id {
            self.user_id = user_id;
        }
        if let Some(username) = patch.username {
            self.username = username;
        }
        if let Some(avatar) = patch.avatar {
            self.avatar = avatar;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ── Settings ─────────────────────────────────────────────────────────────────

/// Singleton bot credentials and logging preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub id: i64,
    pub discord_token: String,
    pub revolt_token: String,
    pub webhook_url: Option<String>,
    pub log_level: LogLevel,
}

impl Settings {
    pub(crate) fn empty(id: i64) -> Self {
        Self {
            id,
            discord_token: String::new(),
            revolt_token: String::new(),
            webhook_url: None,
            log_level: LogLevel::Info,
        }
    }

    /// Both bot tokens are present.
    pub fn has_tokens(&self) -> bool {
        !self.discord_token.is_empty() && !self.revolt_token.is_empty()
    }

    pub(crate) fn apply(&mut self, patch: SettingsPatch) {
        if let Some(token) = patch.discord_token {
            self.discord_token = token;
        }
        if let Some(token) = patch.revolt_token {
            self.revolt_token = token;
        }
        if let Some(url) = patch.webhook_url {
            self.webhook_url = Some(url);
        }
        if let Some(level) = patch.log_level {
            self.log_level = level;
        }
    }
}

/// PATCH /api/settings body. Omitted or null fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub discord_token: Option<String>,
    pub revolt_token: Option<String>,
    pub webhook_url: Option<String>,
    pub log_level: Option<LogLevel>,
}

// ── Logs ─────────────────────────────────────────────────────────────────────

/// Severity of a log entry. Ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    /// Whether an entry at `self` passes a `threshold` setting.
    pub fn within(self, threshold: LogLevel) -> bool {
        self <= threshold
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Structured metadata attached to a log entry.
pub type LogMetadata = Map<String, Value>;

/// A stored, append-only log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Option<LogMetadata>,
}

/// A log entry before it is assigned an id.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Option<LogMetadata>,
}

impl NewLogEntry {
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            metadata: None,
        }
    }

    /// Attach metadata. Non-object values are dropped.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = match metadata {
            Value::Object(map) => Some(map),
            _ => None,
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_bridge_requires_channels() {
        let err = serde_json::from_value::<NewBridge>(json!({ "discordChannelId": "d1" }));
        assert!(err.is_err());

        let ok: NewBridge = serde_json::from_value(json!({
            "discordChannelId": "d1",
            "revoltChannelId": "r1"
        }))
        .unwrap();
        assert_eq!(ok.enabled, None);
    }

    #[test]
    fn test_masquerade_patch_distinguishes_null_avatar() {
        let omitted: MasqueradePatch = serde_json::from_value(json!({ "username": "x" })).unwrap();
        assert_eq!(omitted.avatar, None);

        let cleared: MasqueradePatch = serde_json::from_value(json!({ "avatar": null })).unwrap();
        assert_eq!(cleared.avatar, Some(None));

        let set: MasqueradePatch =
            serde_json::from_value(json!({ "avatar": "http://a/b.png" })).unwrap();
        assert_eq!(set.avatar, Some(Some("http://a/b.png".to_string())));
    }

    #[test]
    fn test_settings_patch_rejects_unknown_log_level() {
        let err = serde_json::from_value::<SettingsPatch>(json!({ "logLevel": "verbose" }));
        assert!(err.is_err());
    }

    #[test]
    fn test_log_level_threshold() {
        assert!(LogLevel::Error.within(LogLevel::Info));
        assert!(LogLevel::Info.within(LogLevel::Info));
        assert!(!LogLevel::Debug.within(LogLevel::Info));
        assert!(LogLevel::Debug.within(LogLevel::Debug));
        assert!(!LogLevel::Warn.within(LogLevel::Error));
    }

    #[test]
    fn test_settings_serialize_camel_case() {
        let value = serde_json::to_value(Settings::empty(1)).unwrap();
        assert_eq!(value["discordToken"], "");
        assert_eq!(value["revoltToken"], "");
        assert_eq!(value["webhookUrl"], Value::Null);
        assert_eq!(value["logLevel"], "info");
    }

    #[test]
    fn test_log_entry_metadata_must_be_object() {
        let entry = NewLogEntry::now(LogLevel::Info, "x").with_metadata(json!("scalar"));
        assert!(entry.metadata.is_none());

        let entry = NewLogEntry::now(LogLevel::Info, "x").with_metadata(json!({ "a": 1 }));
        assert_eq!(entry.metadata.unwrap()["a"], 1);
    }
}
