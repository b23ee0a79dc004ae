//! Gateway configuration
//!
//! Engine knobs plus the driver binary's listener/policy sections. Loaded
//! from a JSON file with environment overrides, in camelCase to match the
//! boundary types.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limiter::RateLimitSettings;
use crate::proxy_protocol::InboundProxyMode;

/// Environment variable selecting the log filter
pub const LOG_ENV: &str = "MINEGATE_LOG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read configuration {path}: {source}")]
    Read {
        /// Offending path
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON parse or validation failure
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Runtime-settable global options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayOptions {
    /// Inbound PROXY Protocol handling
    pub proxy_protocol_in: InboundProxyMode,
}

/// One listener the driver starts at boot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
}

/// Static route the driver's built-in policy answers with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticRouteConfig {
    /// Backend host
    pub remote_host: String,
    /// Backend port
    pub remote_port: u16,
    /// Optional handshake host rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_host: Option<String>,
}

/// Full gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Global options
    #[serde(flatten)]
    pub options: GatewayOptions,
    /// Listeners the driver starts at boot
    pub listeners: Vec<ListenerConfig>,
    /// Policy decision deadline in milliseconds
    pub decision_timeout_ms: u64,
    /// Backend dial deadline in milliseconds
    pub connect_timeout_ms: u64,
    /// Default rate limit applied to each new connection
    pub global_rate_limit: Option<RateLimitSettings>,
    /// Built-in policy: route every login here (driver binary only)
    pub static_route: Option<StaticRouteConfig>,
    /// Built-in policy: static MOTD description text (driver binary only)
    pub motd_text: Option<String>,
    /// Initial log filter, overridden by `MINEGATE_LOG`
    pub log_level: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            options: GatewayOptions::default(),
            listeners: Vec::new(),
            decision_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            global_rate_limit: None,
            static_route: None,
            motd_text: None,
            log_level: None,
        }
    }
}

impl GatewayConfig {
    /// Policy decision deadline
    #[must_use]
    pub const fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    /// Backend dial deadline
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Load from a JSON file
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unreadable files or invalid JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load with environment overrides applied
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`].
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        if let Ok(level) = std::env::var(LOG_ENV) {
            if !level.is_empty() {
                config.log_level = Some(level);
            }
        }
        Ok(config)
    }

    /// Effective log filter
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}
