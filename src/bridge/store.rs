//! In-memory config store.
//!
//! Holds bridges, masquerades, the settings singleton, and the bounded log
//! ring. Bridges and masquerades live in DashMaps so the relay path can read
//! them while the admin API writes. Nothing is persisted: a restart starts
//! from an empty store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::models::{
    Bridge, BridgePatch, LogEntry, LogLevel, Masquerade, MasqueradePatch, NewBridge,
    NewLogEntry, NewMasquerade, Settings, SettingsPatch,
};
use crate::error::{RelayError, Result};
use crate::platform::Platform;

/// Maximum number of log entries kept in memory.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Default number of entries returned by [`ConfigStore::logs`].
pub const DEFAULT_LOG_LIMIT: usize = 100;

/// Log reads only return entries newer than this.
const LOG_WINDOW_HOURS: i64 = 24;

/// Bounded ring of log entries.
struct LogRing {
    entries: VecDeque<LogEntry>,
    next_id: i64,
}

/// Shared configuration store.
#[derive(Clone)]
pub struct ConfigStore {
    /// Bridge id → bridge
    bridges: Arc<DashMap<i64, Bridge>>,
    /// Masquerade id → masquerade
    masquerades: Arc<DashMap<i64, Masquerade>>,
    /// Lazily created settings singleton.
    settings: Arc<RwLock<Option<Settings>>>,
    logs: Arc<RwLock<LogRing>>,
    next_bridge_id: Arc<AtomicI64>,
    next_masquerade_id: Arc<AtomicI64>,
    next_settings_id: Arc<AtomicI64>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            bridges: Arc::new(DashMap::new()),
            masquerades: Arc::new(DashMap::new()),
            settings: Arc::new(RwLock::new(None)),
            logs: Arc::new(RwLock::new(LogRing {
                entries: VecDeque::with_capacity(MAX_LOG_ENTRIES),
                next_id: 1,
            })),
            next_bridge_id: Arc::new(AtomicI64::new(1)),
            next_masquerade_id: Arc::new(AtomicI64::new(1)),
            next_settings_id: Arc::new(AtomicI64::new(1)),
        }
    }

    // ── Bridges ──────────────────────────────────────────────────────────────

    /// All bridges in creation order.
    pub fn list_bridges(&self) -> Vec<Bridge> {
        let mut bridges: Vec<Bridge> = self.bridges.iter().map(|r| r.value().clone()).collect();
        bridges.sort_by_key(|b| b.id);
        bridges
    }

    pub fn get_bridge(&self, id: i64) -> Option<Bridge> {
        self.bridges.get(&id).map(|r| r.clone())
    }

    pub fn create_bridge(&self, new: NewBridge) -> Bridge {
        let bridge = Bridge {
            id: self.next_bridge_id.fetch_add(1, Ordering::SeqCst),
            discord_channel_id: new.discord_channel_id,
            revolt_channel_id: new.revolt_channel_id,
            enabled: new.enabled.unwrap_or(true),
        };
        tracing::info!(
            bridge_id = bridge.id,
            discord_channel = bridge.discord_channel_id.as_str(),
            revolt_channel = bridge.revolt_channel_id.as_str(),
            "[Bridge] Created bridge"
        );
        self.bridges.insert(bridge.id, bridge.clone());
        bridge
    }

    pub fn update_bridge(&self, id: i64, patch: BridgePatch) -> Result<Bridge> {
        let mut bridge = self
            .bridges
            .get_mut(&id)
            .ok_or(RelayError::NotFound("Bridge"))?;
        bridge.apply(patch);
        let updated = bridge.clone();
        drop(bridge);
        tracing::info!(
            bridge_id = id,
            enabled = updated.enabled,
            "[Bridge] Updated bridge"
        );
        Ok(updated)
    }

    /// Remove a bridge. Unknown ids are ignored.
    pub fn delete_bridge(&self, id: i64) {
        if self.bridges.remove(&id).is_some() {
            tracing::info!(bridge_id = id, "[Bridge] Deleted bridge");
        }
    }

    /// The first enabled bridge with `channel` as its endpoint on `platform`.
    ///
    /// "First" is the lowest id when duplicates exist.
    pub fn find_bridge_for_channel(&self, platform: Platform, channel: &str) -> Option<Bridge> {
        self.bridges
            .iter()
            .filter(|r| {
                let bridge = r.value();
                bridge.enabled
                    && match platform {
                        Platform::Discord => bridge.discord_channel_id == channel,
                        Platform::Revolt => bridge.revolt_channel_id == channel,
                    }
            })
            .min_by_key(|r| r.value().id)
            .map(|r| r.value().clone())
    }

    // ── Masquerades ──────────────────────────────────────────────────────────

    /// All masquerades scoped to a bridge, in creation order.
    pub fn masquerades_for_bridge(&self, bridge_id: i64) -> Vec<Masquerade> {
        let mut masquerades: Vec<Masquerade> = self
            .masquerades
            .iter()
            .filter(|r| r.value().bridge_id == bridge_id)
            .map(|r| r.value().clone())
            .collect();
        masquerades.sort_by_key(|m| m.id);
        masquerades
    }

    pub fn get_masquerade(&self, id: i64) -> Option<Masquerade> {
        self.masquerades.get(&id).map(|r| r.clone())
    }

    pub fn create_masquerade(&self, new: NewMasquerade) -> Masquerade {
        let masquerade = Masquerade {
            id: self.next_masquerade_id.fetch_add(1, Ordering::SeqCst),
            bridge_id: new.bridge_id,
            user_id: new.user_id,
            username: new.username,
            avatar: new.avatar,
            enabled: new.enabled.unwrap_or(true),
        };
        tracing::info!(
            masquerade_id = masquerade.id,
            bridge_id = masquerade.bridge_id,
            user_id = masquerade.user_id.as_str(),
            "[Bridge] Created masquerade"
        );
        self.masquerades.insert(masquerade.id, masquerade.clone());
        masquerade
    }

    pub fn update_masquerade(&self, id: i64, patch: MasqueradePatch) -> Result<Masquerade> {
        let mut masquerade = self
            .masquerades
            .get_mut(&id)
            .ok_or(RelayError::NotFound("Masquerade"))?;
        masquerade.apply(patch);
        let updated = masquerade.clone();
        drop(masquerade);
        tracing::info!(masquerade_id = id, "[Bridge] Updated masquerade");
        Ok(updated)
    }

    /// Remove a masquerade. Unknown ids are ignored.
    pub fn delete_masquerade(&self, id: i64) {
        if self.masquerades.remove(&id).is_some() {
            tracing::info!(masquerade_id = id, "[Bridge] Deleted masquerade");
        }
    }

    /// The enabled override for `user_id` on `bridge_id`, if any.
    pub fn find_masquerade(&self, bridge_id: i64, user_id: &str) -> Option<Masquerade> {
        self.masquerades
            .iter()
            .filter(|r| {
                let m = r.value();
                m.enabled && m.bridge_id == bridge_id && m.user_id == user_id
            })
            .min_by_key(|r| r.value().id)
            .map(|r| r.value().clone())
    }

    // ── Settings ─────────────────────────────────────────────────────────────

    /// Current settings, created with empty tokens on first access.
    pub fn settings(&self) -> Settings {
        if let Some(settings) = self.settings.read().as_ref() {
            return settings.clone();
        }
        let mut slot = self.settings.write();
        slot.get_or_insert_with(|| Settings::empty(self.next_settings_id.fetch_add(1, Ordering::SeqCst)))
            .clone()
    }

    /// Merge `patch` into the settings. Omitted fields keep their value.
    pub fn update_settings(&self, patch: SettingsPatch) -> Settings {
        let mut slot = self.settings.write();
        let settings = slot.get_or_insert_with(|| {
            Settings::empty(self.next_settings_id.fetch_add(1, Ordering::SeqCst))
        });
        settings.apply(patch);
        tracing::info!(
            discord_token_set = !settings.discord_token.is_empty(),
            revolt_token_set = !settings.revolt_token.is_empty(),
            log_level = %settings.log_level,
            "[Bridge] Settings updated"
        );
        settings.clone()
    }

    fn log_threshold(&self) -> LogLevel {
        self.settings
            .read()
            .as_ref()
            .map(|s| s.log_level)
            .unwrap_or(LogLevel::Info)
    }

    // ── Logs ─────────────────────────────────────────────────────────────────

    /// Append an entry, evicting the oldest once the ring is full.
    ///
    /// Every entry is mirrored to `tracing`; entries less severe than the
    /// configured log level are not stored and `None` is returned.
    pub fn append_log(&self, entry: NewLogEntry) -> Option<LogEntry> {
        trace_entry(&entry);
        if !entry.level.within(self.log_threshold()) {
            return None;
        }

        let mut ring = self.logs.write();
        let stored = LogEntry {
            id: ring.next_id,
            timestamp: entry.timestamp,
            level: entry.level,
            message: entry.message,
            metadata: entry.metadata,
        };
        ring.next_id += 1;
        ring.entries.push_back(stored.clone());
        while ring.entries.len() > MAX_LOG_ENTRIES {
            ring.entries.pop_front();
        }
        Some(stored)
    }

    /// Append an entry timestamped now.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, metadata: Option<Value>) {
        let mut entry = NewLogEntry::now(level, message);
        if let Some(metadata) = metadata {
            entry = entry.with_metadata(metadata);
        }
        self.append_log(entry);
    }

    /// The most recent `limit` entries from the last 24 hours, oldest first.
    pub fn logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let limit = limit.unwrap_or(DEFAULT_LOG_LIMIT);
        let cutoff = Utc::now() - Duration::hours(LOG_WINDOW_HOURS);
        let ring = self.logs.read();
        let recent: Vec<&LogEntry> = ring
            .entries
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .collect();
        let skip = recent.len().saturating_sub(limit);
        recent.into_iter().skip(skip).cloned().collect()
    }

    /// Drop every error-level entry.
    pub fn clear_error_logs(&self) {
        let mut ring = self.logs.write();
        let before = ring.entries.len();
        ring.entries.retain(|e| e.level != LogLevel::Error);
        tracing::debug!(
            removed = before - ring.entries.len(),
            "[Bridge] Cleared error log entries"
        );
    }

    /// Number of stored entries, ignoring the read window.
    #[cfg(test)]
    pub fn log_count(&self) -> usize {
        self.logs.read().entries.len()
    }
}

fn trace_entry(entry: &NewLogEntry) {
    let metadata = entry
        .metadata
        .as_ref()
        .map(|m| Value::Object(m.clone()).to_string())
        .unwrap_or_default();
    let message = entry.message.as_str();
    match entry.level {
        LogLevel::Error => tracing::error!(metadata = metadata.as_str(), "{message}"),
        LogLevel::Warn => tracing::warn!(metadata = metadata.as_str(), "{message}"),
        LogLevel::Info => tracing::info!(metadata = metadata.as_str(), "{message}"),
        LogLevel::Debug => tracing::debug!(metadata = metadata.as_str(), "{message}"),
    }
}
