//! Gateway reconnection with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde_json::json;

use crate::bridge::models::LogLevel;
use crate::bridge::ConfigStore;
use crate::error::Result;
use crate::platform::Platform;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Keep a gateway session alive.
///
/// `connect` runs one session to completion. A clean return resets the
/// backoff; any error doubles it up to 60 seconds. A rejected login ends the
/// loop for good since retrying with the same token cannot succeed.
pub async fn reconnect_loop<F, Fut>(platform: Platform, store: &ConfigStore, mut connect: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut backoff = INITIAL_BACKOFF;

    loop {
        tracing::info!(platform = %platform, "[{platform}] Connecting to gateway...");

        match connect().await {
            Ok(()) => {
                tracing::info!(platform = %platform, "[{platform}] Gateway session closed");
                backoff = INITIAL_BACKOFF;
            }
            Err(e) if e.is_fatal_login() => {
                store.log(
                    LogLevel::Error,
                    format!("{platform} bot login failed"),
                    Some(json!({ "error": e.to_string() })),
                );
                return;
            }
            Err(e) => {
                store.log(
                    LogLevel::Warn,
                    format!("{platform} gateway connection lost"),
                    Some(json!({ "error": e.to_string(), "retryInSecs": backoff.as_secs() })),
                );
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_login_failure_stops_retrying() {
        let store = ConfigStore::new();
        let attempts = AtomicUsize::new(0);

        reconnect_loop(Platform::Discord, &store, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(RelayError::Gateway("dropped".into()))
            } else {
                Err(RelayError::LoginFailed {
                    platform: Platform::Discord,
                    reason: "Authentication failed".into(),
                })
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let logs = store.logs(None);
        assert_eq!(logs.last().unwrap().message, "Discord bot login failed");
        assert_eq!(
            logs.iter()
                .filter(|e| e.message == "Discord gateway connection lost")
                .count(),
            2
        );
    }
}
