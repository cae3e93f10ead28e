//! SOCKS5 proxy settings and their stored credentials.
//!
//! Only the HTTP dispatcher goes through the proxy. The push channel
//! always connects directly.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::secrets::SecretStore;

/// SOCKS5 proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Whether the proxy expects a username and password.
    #[serde(default)]
    pub needs_authentication: bool,
}

impl ProxySettings {
    /// Proxy without authentication.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            needs_authentication: false,
        }
    }

    /// Parse `host:port`.
    pub fn parse(value: &str) -> Result<Self> {
        let (host, port) = value
            .rsplit_once(':')
            .with_context(|| format!("expected host:port, got {value:?}"))?;
        anyhow::ensure!(!host.is_empty(), "proxy host is empty in {value:?}");
        let port = port
            .parse()
            .with_context(|| format!("invalid proxy port in {value:?}"))?;
        Ok(Self::new(host, port))
    }

    /// `socks5://[user:pass@]host:port`. Credentials are embedded only when
    /// the proxy needs authentication.
    pub fn socks5_url(&self, credentials: Option<&ProxyCredentials>) -> Zeroizing<String> {
        match credentials.filter(|_| self.needs_authentication) {
            Some(credentials) => Zeroizing::new(format!(
                "socks5://{}:{}@{}:{}",
                urlencode(&credentials.username),
                urlencode(&credentials.password),
                self.host,
                self.port
            )),
            None => Zeroizing::new(format!("socks5://{}:{}", self.host, self.port)),
        }
    }

    /// Proxy for the reqwest client.
    pub fn reqwest_proxy(&self, credentials: Option<&ProxyCredentials>) -> Result<reqwest::Proxy> {
        reqwest::Proxy::all(self.socks5_url(credentials).as_str())
            .with_context(|| format!("Invalid proxy {}:{}", self.host, self.port))
    }

    fn username_account(&self) -> String {
        format!("{}-proxy-username", self.host)
    }

    fn password_account(&self) -> String {
        format!("{}-proxy-password", self.host)
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Username and password for a [`ProxySettings`].
#[derive(Clone)]
pub struct ProxyCredentials {
    /// Proxy user name.
    pub username: String,
    /// Proxy password.
    pub password: Zeroizing<String>,
    /// Proxy these credentials belong to.
    pub proxy: ProxySettings,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl ProxyCredentials {
    /// Credentials for `proxy`.
    pub fn new(proxy: ProxySettings, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            proxy,
        }
    }

    /// Write both accounts to `store`.
    pub fn persist(&self, store: &dyn SecretStore) -> Result<()> {
        store
            .store(&self.proxy.username_account(), &self.username)
            .context("Could not save proxy username")?;
        store
            .store(&self.proxy.password_account(), &self.password)
            .context("Could not save proxy password")?;
        log::info!("[Secrets] Saved proxy credentials for {}", self.proxy.host);
        Ok(())
    }

    /// Stored credentials for `proxy`, or `None` if either account is
    /// missing or unreadable.
    pub fn retrieve(proxy: &ProxySettings, store: &dyn SecretStore) -> Option<Self> {
        let fetch = |account: String| match store.fetch(&account) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[Secrets] Could not read {account}: {e:#}");
                None
            }
        };
        let username = fetch(proxy.username_account())?;
        let password = fetch(proxy.password_account())?;
        Some(Self::new(proxy.clone(), username, password))
    }

    /// Delete both accounts from `store`.
    pub fn remove(proxy: &ProxySettings, store: &dyn SecretStore) -> Result<()> {
        store.remove(&proxy.username_account())?;
        store.remove(&proxy.password_account())?;
        log::info!("[Secrets] Removed proxy credentials for {}", proxy.host);
        Ok(())
    }
}

/// Proxy for the dispatcher's HTTP client, with stored credentials
/// applied when the proxy needs them.
pub fn configured_proxy(
    settings: Option<&ProxySettings>,
    store: &Arc<dyn SecretStore>,
) -> Result<Option<reqwest::Proxy>> {
    let Some(settings) = settings else {
        return Ok(None);
    };
    let credentials = if settings.needs_authentication {
        let credentials = ProxyCredentials::retrieve(settings, store.as_ref());
        if credentials.is_none() {
            log::warn!(
                "[Secrets] Proxy {} needs authentication but no credentials are stored",
                settings.host
            );
        }
        credentials
    } else {
        None
    };
    settings.reqwest_proxy(credentials.as_ref()).map(Some)
}
