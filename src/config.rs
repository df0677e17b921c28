//! Application-level configuration loading: realtime client, relay and BYE table settings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::services::seeding::{ByeTable, RawByeTable};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "COURTSIDE_CONFIG_PATH";

const DEFAULT_REALTIME_URL: &str = "ws://localhost:8080/ws";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;
const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_TEARDOWN_GRACE_MS: u64 = 3_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    realtime: RealtimeConfig,
    relay: RelayConfig,
    bye_table: ByeTable,
}

/// Settings of the realtime subscription client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Relay endpoint.
    pub url: String,
    /// Fixed delay between connection attempts.
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts before every topic is failed.
    pub max_connect_attempts: u32,
    /// How long an unused connection is kept open.
    pub teardown_grace: Duration,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REALTIME_URL.to_string(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            teardown_grace: Duration::from_millis(DEFAULT_TEARDOWN_GRACE_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

/// Credentials accepted by the relay. `None` leaves the role open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayConfig {
    /// Token required to open a subscriber connection.
    pub subscriber_token: Option<String>,
    /// Token required to publish over the socket.
    pub publisher_token: Option<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        realtime_url = %app_config.realtime.url,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
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

    /// Settings of the realtime subscription client.
    pub fn realtime(&self) -> &RealtimeConfig {
        &self.realtime
    }

    /// Relay credentials.
    pub fn relay(&self) -> &RelayConfig {
        &self.relay
    }

    /// BYE placement table for draw creation.
    pub fn bye_table(&self) -> &ByeTable {
        &self.bye_table
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            realtime: RealtimeConfig::default(),
            relay: RelayConfig::default(),
            bye_table: ByeTable::standard(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    realtime: RawRealtime,
    #[serde(default)]
    relay: RawRelay,
    #[serde(default)]
    bye_table: Option<RawByeTable>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRealtime {
    url: Option<String>,
    reconnect_delay_ms: Option<u64>,
    max_connect_attempts: Option<u32>,
    teardown_grace_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRelay {
    subscriber_token: Option<String>,
    publisher_token: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let bye_table = match value.bye_table {
            None => ByeTable::standard(),
            Some(raw) => ByeTable::from_raw(raw).unwrap_or_else(|err| {
                warn!(error = %err, "invalid BYE table in config; using the built-in one");
                ByeTable::standard()
            }),
        };

        Self {
            realtime: value.realtime.into(),
            relay: RelayConfig {
                subscriber_token: value.relay.subscriber_token.filter(|token| !token.is_empty()),
                publisher_token: value.relay.publisher_token.filter(|token| !token.is_empty()),
            },
            bye_table,
        }
    }
}

impl From<RawRealtime> for RealtimeConfig {
    fn from(value: RawRealtime) -> Self {
        let defaults = RealtimeConfig::default();
        let max_connect_attempts = match value.max_connect_attempts {
            Some(0) => {
                warn!("max_connect_attempts must be at least 1; using 1");
                1
            }
            Some(attempts) => attempts,
            None => defaults.max_connect_attempts,
        };

        Self {
            url: value.url.unwrap_or(defaults.url),
            reconnect_delay: value
                .reconnect_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            max_connect_attempts,
            teardown_grace: value
                .teardown_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.teardown_grace),
            connect_timeout: value
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
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
