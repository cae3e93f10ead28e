//! Configuration loading and persistence.
//!
//! Handles reading and writing the transport configuration file. Proxy
//! passwords never land here; they live in the secret store.

use std::time::Duration;
use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::constants::{KEEPALIVE_INTERVAL, MIN_KEEPALIVE_INTERVAL};
use crate::logging::MonitoringLevel;
use crate::proxy::ProxySettings;
use crate::push::ReconnectPolicy;
use crate::trust::PinnedTrustEntry;

/// Config file name inside the config directory.
const CONFIG_FILE: &str = "config.json";

/// Directory name under the platform config dir.
const APP_DIR: &str = "backend-transport";

/// URLs of one backend deployment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BackendEndpoints {
    /// REST API base URL.
    pub backend_url: Url,
    /// WebSocket base URL for the push channel (`http(s)` is accepted and
    /// rewritten to `ws(s)`).
    pub backend_ws_url: Url,
    /// Client version blacklist.
    pub blacklist_url: Url,
    /// Team management site.
    pub teams_url: Url,
    /// Account management site.
    pub accounts_url: Url,
    /// Public website.
    pub website_url: Url,
}

/// A named backend deployment and its pinning table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BackendEnvironment {
    /// Display name.
    pub title: String,
    /// Endpoints.
    pub endpoints: BackendEndpoints,
    /// Pinned leaf keys for backend hosts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pinned_keys: Vec<PinnedTrustEntry>,
}

impl Default for BackendEnvironment {
    fn default() -> Self {
        let url = |s: &str| Url::parse(s).unwrap_or_else(|_| unreachable!("static URL {s}"));
        Self {
            title: "Production".to_string(),
            endpoints: BackendEndpoints {
                backend_url: url("https://prod-nginz-https.wire.com"),
                backend_ws_url: url("https://prod-nginz-ssl.wire.com"),
                blacklist_url: url("https://clientblacklist.wire.com/prod"),
                teams_url: url("https://teams.wire.com"),
                accounts_url: url("https://account.wire.com"),
                website_url: url("https://wire.com"),
            },
            pinned_keys: Vec::new(),
        }
    }
}

/// Configuration for the transport.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Backend deployment.
    pub backend: BackendEnvironment,
    /// SOCKS5 proxy for HTTP requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySettings>,
    /// Push channel reconnect behaviour.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// Seconds between push channel keepalive pings.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Level at which request/response records reach the remote logger.
    #[serde(default)]
    pub monitoring_level: MonitoringLevel,
}

fn default_keepalive_secs() -> u64 {
    KEEPALIVE_INTERVAL.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendEnvironment::default(),
            proxy: None,
            reconnect: ReconnectPolicy::default(),
            keepalive_secs: default_keepalive_secs(),
            monitoring_level: MonitoringLevel::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/transport-test`
    /// 2. `TRANSPORT_CONFIG_DIR` env var: explicit override
    /// 3. `TRANSPORT_ENV=test`: `tmp/transport-test` (integration tests)
    /// 4. Default: platform config dir (Linux: ~/.config/backend-transport)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                test_config_dir()
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("TRANSPORT_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else if crate::env::is_any_test() {
                    test_config_dir()
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join(APP_DIR)
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of the config file.
    pub fn path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file yields the defaults; an unreadable one is an error.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            log::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_url("TRANSPORT_BACKEND_URL") {
            self.backend.endpoints.backend_url = url;
        }

        if let Some(url) = env_url("TRANSPORT_BACKEND_WS_URL") {
            self.backend.endpoints.backend_ws_url = url;
        }

        if let Ok(keepalive) = std::env::var("TRANSPORT_KEEPALIVE_SECS") {
            match keepalive.parse::<u64>() {
                Ok(secs) if secs > 0 => self.keepalive_secs = secs,
                _ => log::warn!("Ignoring invalid TRANSPORT_KEEPALIVE_SECS={keepalive:?}"),
            }
        }

        if let Ok(proxy) = std::env::var("TRANSPORT_PROXY") {
            match ProxySettings::parse(&proxy) {
                Ok(settings) => self.proxy = Some(settings),
                Err(e) => log::warn!("Ignoring TRANSPORT_PROXY: {e:#}"),
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::path()?;
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        // Owner read/write only
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Keepalive interval, never shorter than [`MIN_KEEPALIVE_INTERVAL`].
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs).max(MIN_KEEPALIVE_INTERVAL)
    }

    /// Push channel base URL with a WebSocket scheme.
    pub fn push_base_url(&self) -> Result<Url> {
        let raw = crate::ws::http_to_ws_scheme(self.backend.endpoints.backend_ws_url.as_str());
        Url::parse(&raw).with_context(|| format!("Invalid push URL {raw}"))
    }
}

fn test_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/transport-test")
}

fn env_url(var: &str) -> Option<Url> {
    let value = std::env::var(var).ok()?;
    match Url::parse(&value) {
        Ok(url) => Some(url),
        Err(e) => {
            log::warn!("Ignoring invalid {var}={value:?}: {e}");
            None
        }
    }
}
