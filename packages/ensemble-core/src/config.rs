//! Tunable configuration.
//!
//! Loaded from YAML with `ENSEMBLE_*` environment overrides. Every field has
//! a default, so an empty or missing file yields a usable config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, EnsembleResult};
use crate::players::RegistryConfig;
use crate::playback::SyncConfig;
use crate::transport::TransportConfig;

/// Configuration for the Ensemble core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deadline for each command response (seconds).
    /// Override: `ENSEMBLE_REQUEST_TIMEOUT_SECS`
    pub request_timeout_secs: u64,

    /// Deadline for the socket handshake and server greeting (seconds).
    /// Override: `ENSEMBLE_CONNECT_TIMEOUT_SECS`
    pub connect_timeout_secs: u64,

    /// Poll interval for the selected player's state (milliseconds).
    /// Override: `ENSEMBLE_POLL_INTERVAL_MS`
    pub poll_interval_ms: u64,

    /// Unforced player list refreshes inside this window are skipped (seconds).
    /// Override: `ENSEMBLE_CACHE_WINDOW_SECS`
    pub cache_window_secs: u64,

    /// Wait after toggle/skip before re-reading state (milliseconds).
    pub settle_delay_ms: u64,

    /// Capacity of the [`CoreEvent`](crate::events::CoreEvent) broadcast channel.
    pub event_channel_capacity: usize,

    /// Retired default player name. Players whose name contains it are hidden.
    pub ghost_player_name: String,

    /// Label attached to long-lived tokens minted for this client.
    /// Override: `ENSEMBLE_CLIENT_NAME`
    pub client_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            connect_timeout_secs: 10,
            poll_interval_ms: 3000,
            cache_window_secs: 30,
            settle_delay_ms: 500,
            event_channel_capacity: 100,
            ghost_player_name: "This Device".to_string(),
            client_name: "Ensemble".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file, then applies environment overrides.
    ///
    /// # Errors
    /// `Configuration` if the file cannot be read or parsed, or if the result
    /// fails [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> EnsembleResult<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    EnsembleError::Configuration(format!(
                        "Failed to read config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses YAML. An empty document yields the defaults.
    pub fn from_yaml(content: &str) -> EnsembleResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| EnsembleError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Applies overrides from `lookup`; unparseable values are ignored.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = number("ENSEMBLE_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v;
        }
        if let Some(v) = number("ENSEMBLE_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = v;
        }
        if let Some(v) = number("ENSEMBLE_POLL_INTERVAL_MS") {
            self.poll_interval_ms = v;
        }
        if let Some(v) = number("ENSEMBLE_CACHE_WINDOW_SECS") {
            self.cache_window_secs = v;
        }
        if let Some(name) = lookup("ENSEMBLE_CLIENT_NAME").filter(|v| !v.trim().is_empty()) {
            self.client_name = name;
        }
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    /// `Configuration` naming the first offending field.
    pub fn validate(&self) -> EnsembleResult<()> {
        let check = |ok: bool, msg: &str| {
            if ok {
                Ok(())
            } else {
                Err(EnsembleError::Configuration(msg.to_string()))
            }
        };

        check(self.request_timeout_secs > 0, "request_timeout_secs must be >= 1")?;
        check(self.connect_timeout_secs > 0, "connect_timeout_secs must be >= 1")?;
        check(self.poll_interval_ms > 0, "poll_interval_ms must be >= 1")?;
        // broadcast::channel panics on 0
        check(self.event_channel_capacity > 0, "event_channel_capacity must be >= 1")?;
        check(!self.client_name.trim().is_empty(), "client_name must not be empty")
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: self.request_timeout(),
        }
    }

    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            cache_window: Duration::from_secs(self.cache_window_secs),
            ghost_player_name: self.ghost_player_name.clone(),
        }
    }

    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }
}
