//! Runtime configuration loading: presence timings, feed retry and backend selection.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::presence::PresenceTimings;

/// Default location on disk where the runner looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/sync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "GRIDWALK_SYNC_CONFIG_PATH";

/// Which store implementations back a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process stores; every client must live in the same process.
    #[default]
    Local,
    /// CouchDB documents shared across machines.
    Couch,
}

/// Immutable runtime configuration shared across a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub backend: StoreBackend,
    pub presence: PresenceTimings,
    /// Base delay before a failed change-feed request is retried.
    pub feed_retry: Duration,
    /// How many times a guest retries joining before the host's first push lands.
    pub join_attempts: u32,
    pub join_retry: Duration,
}

impl SyncConfig {
    /// Load the configuration from disk, falling back to the built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|err| {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to parse config; falling back to defaults"
                );
                Self::default()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document; absent fields keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        let config: Self = raw.into();
        info!(
            backend = ?config.backend,
            heartbeat_ms = config.presence.heartbeat_interval.as_millis() as u64,
            grace_ms = config.presence.grace_period.as_millis() as u64,
            "loaded sync config"
        );
        Ok(config)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    backend: StoreBackend,
    heartbeat_interval_ms: u64,
    monitor_tick_ms: u64,
    disconnect_threshold_ms: u64,
    kick_timeout_ms: u64,
    grace_period_ms: u64,
    feed_retry_ms: u64,
    join_attempts: u32,
    join_retry_ms: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            heartbeat_interval_ms: 5_000,
            monitor_tick_ms: 2_000,
            disconnect_threshold_ms: 60_000,
            kick_timeout_ms: 30_000,
            grace_period_ms: 4_000,
            feed_retry_ms: 1_000,
            join_attempts: 10,
            join_retry_ms: 500,
        }
    }
}

impl From<RawConfig> for SyncConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            backend: value.backend,
            presence: PresenceTimings {
                heartbeat_interval: Duration::from_millis(value.heartbeat_interval_ms.max(1)),
                monitor_tick: Duration::from_millis(value.monitor_tick_ms.max(1)),
                disconnect_threshold: Duration::from_millis(value.disconnect_threshold_ms),
                kick_timeout: Duration::from_millis(value.kick_timeout_ms),
                grace_period: Duration::from_millis(value.grace_period_ms),
            },
            feed_retry: Duration::from_millis(value.feed_retry_ms),
            join_attempts: value.join_attempts.max(1),
            join_retry: Duration::from_millis(value.join_retry_ms),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
